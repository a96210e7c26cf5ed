//! Per-route state carried along a walk.
//!
//! A payload is created once when a route starts and is moved from actor to
//! actor with every handoff. It decides whether the walk keeps going.

use std::collections::HashMap;
use std::ops::AddAssign;

use crate::route::RouteId;

/// State threaded along one route's walk.
pub trait Payload: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Whether the next cell should be visited.
    fn keep_going(&self) -> bool;

    /// Account for one visited cell.
    fn advance(&mut self);
}

/// Visit budget: stop after `max` cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellCounter {
    visited: u64,
    max: u64,
}

impl CellCounter {
    pub fn new(max: u64) -> Self {
        Self { visited: 0, max }
    }

    pub fn unbounded() -> Self {
        Self::new(u64::MAX)
    }

    pub fn visited(&self) -> u64 {
        self.visited
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

impl Payload for CellCounter {
    fn keep_going(&self) -> bool {
        self.visited < self.max
    }

    fn advance(&mut self) {
        self.visited += 1;
    }
}

/// Running value per route, zero until first touched.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator<Id: RouteId, V> {
    values: HashMap<Id, V>,
}

impl<Id: RouteId, V> Default for Accumulator<Id, V> {
    fn default() -> Self {
        Self {
            values: HashMap::new(),
        }
    }
}

impl<Id: RouteId, V: Copy + Default> Accumulator<Id, V> {
    pub fn value(&mut self, route_id: Id) -> &mut V {
        self.values.entry(route_id).or_default()
    }

    pub fn get(&self, route_id: Id) -> V {
        self.values.get(&route_id).copied().unwrap_or_default()
    }
}

/// Budget plus running sum, used by path integration.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrateData<Id: RouteId, V> {
    pub counter: CellCounter,
    pub accumulator: Accumulator<Id, V>,
}

impl<Id: RouteId, V> IntegrateData<Id, V> {
    pub fn new(max_nr_cells: u64) -> Self {
        Self {
            counter: CellCounter::new(max_nr_cells),
            accumulator: Accumulator::default(),
        }
    }
}

impl<Id, V> Payload for IntegrateData<Id, V>
where
    Id: RouteId,
    V: Copy + Default + AddAssign + std::fmt::Debug + Send + Sync + 'static,
{
    fn keep_going(&self) -> bool {
        self.counter.keep_going()
    }

    fn advance(&mut self) {
        self.counter.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_stops_at_max() {
        let mut counter = CellCounter::new(2);
        assert!(counter.keep_going());
        counter.advance();
        assert!(counter.keep_going());
        counter.advance();
        assert!(!counter.keep_going());
        assert_eq!(counter.visited(), 2);
    }

    #[test]
    fn test_zero_budget_never_walks() {
        assert!(!CellCounter::new(0).keep_going());
    }

    #[test]
    fn test_accumulator_is_lazily_zeroed_per_route() {
        let mut accumulator = Accumulator::<u32, f64>::default();
        assert_eq!(accumulator.get(3), 0.0);

        *accumulator.value(3) += 1.5;
        *accumulator.value(3) += 2.0;
        *accumulator.value(4) += 10.0;

        assert_eq!(accumulator.get(3), 3.5);
        assert_eq!(accumulator.get(4), 10.0);
    }

    #[test]
    fn test_integrate_data_budget_comes_from_counter() {
        let mut data = IntegrateData::<u32, f64>::new(1);
        assert!(data.keep_going());
        data.advance();
        assert!(!data.keep_going());
    }
}
