//! Message types for acton-reactive walk actor communication.
//!
//! Handoff between walk actors is fire-and-forget: the sender never waits for
//! a reply. Results travel through one-shot promises instead.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use acton_reactive::prelude::ActorHandle;

use crate::array::PartitionId;

/// Wire a walk actor to the actors its route fragments hand off to.
///
/// Sent once by the driver, before any walk that may need the mapping.
#[derive(Debug, Clone)]
pub struct SetDownstreamComponents {
    /// Walk actor handle per downstream route partition
    pub components: HashMap<PartitionId, ActorHandle>,
}

/// Walk the next unprocessed fragment of a route.
#[derive(Debug, Clone)]
pub struct WalkRoute<Id, P> {
    /// The route to continue
    pub route_id: Id,
    /// Traveling state, moved along with the route
    pub payload: P,
}

/// Account for the next fragment of a route without visiting its cells.
///
/// Used once a route's budget is exhausted, so downstream partitions still
/// see every fragment of the route and can finish.
#[derive(Debug, Clone)]
pub struct SkipRouteFragments<Id> {
    /// The route whose remaining fragments are skipped
    pub route_id: Id,
}

/// Install the write rule of a walk actor that was spawned without one.
///
/// Sent once the inputs the rule reads are available.
pub struct SetWalkRule<R> {
    pub rule: Arc<R>,
}

impl<R> Clone for SetWalkRule<R> {
    fn clone(&self) -> Self {
        Self {
            rule: Arc::clone(&self.rule),
        }
    }
}

impl<R> fmt::Debug for SetWalkRule<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetWalkRule").finish_non_exhaustive()
    }
}

/// Give up on a walk: the actor drops its output promise unpublished.
#[derive(Debug, Clone, Copy)]
pub struct AbandonWalk;
