//! Path integration: running sums of an integrand along routes.

use std::marker::PhantomData;
use std::ops::AddAssign;
use std::sync::Arc;

use acton_reactive::prelude::ActorRuntime;
use anyhow::{Context, Result};

use crate::actors::WalkRule;
use crate::array::{ArrayPartition, Element, PartitionedArray};
use crate::config::EngineConfig;
use crate::payload::IntegrateData;
use crate::route::{RouteId, SerialRoute};
use crate::walk::{ensure_co_partitioned, walk};

/// Floating-point element an integrand can hold.
///
/// Running sums of integers could overflow or land on the no-data sentinel,
/// so only `f32` and `f64` qualify. A float sum saturates to infinity and
/// never becomes NaN from finite inputs.
pub trait Integrand: Element + Default + AddAssign + sealed::Float {}

impl Integrand for f32 {}
impl Integrand for f64 {}

mod sealed {
    pub trait Float {}

    impl Float for f32 {}
    impl Float for f64 {}
}

/// Adds the integrand to the route's running sum and writes the sum.
///
/// No-data integrand cells are left no-data in the output and do not change
/// the sum. They still count against the visit budget.
pub struct IntegrateRule<Id, V> {
    integrand: Arc<ArrayPartition<V>>,
    _route_id: PhantomData<fn() -> Id>,
}

impl<Id, V> IntegrateRule<Id, V> {
    pub fn new(integrand: Arc<ArrayPartition<V>>) -> Self {
        Self {
            integrand,
            _route_id: PhantomData,
        }
    }
}

impl<Id: RouteId, V: Integrand> WalkRule for IntegrateRule<Id, V> {
    type RouteId = Id;
    type Payload = IntegrateData<Id, V>;
    type Output = V;

    fn visit(
        &self,
        route_id: Id,
        payload: &mut IntegrateData<Id, V>,
        cell_idx: usize,
        output: &mut [V],
    ) {
        let value = self.integrand.data()[cell_idx];
        if value.is_no_data() {
            return;
        }

        let sum = payload.accumulator.value(route_id);
        *sum += value;
        output[cell_idx] = *sum;
    }
}

/// Accumulate `integrand` along every route, over at most `max_nr_cells`
/// cells per route.
///
/// The integrand must be partitioned and placed like the route. Returns once
/// every route has been started. Each actor waits for its own integrand
/// partition, so routes only stall on the partitions they cross.
pub async fn integrate<Id: RouteId, V: Integrand>(
    runtime: &mut ActorRuntime,
    config: &EngineConfig,
    route: &SerialRoute<Id>,
    integrand: &PartitionedArray<V>,
    max_nr_cells: u64,
) -> Result<PartitionedArray<V>> {
    ensure_co_partitioned(route, integrand)?;

    walk::<IntegrateRule<Id, V>, _, _>(
        runtime,
        config,
        route,
        IntegrateData::new(max_nr_cells),
        |route_partition| {
            let id = route_partition.id();
            let partition = integrand.partition(id).clone();
            async move {
                let partition = partition
                    .get()
                    .await
                    .with_context(|| format!("integrand partition {} is unavailable", id))?;
                Ok::<_, anyhow::Error>(IntegrateRule::new(partition))
            }
        },
    )
    .await
}
