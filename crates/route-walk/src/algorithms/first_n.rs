//! Budgeted marking: flag the first cells of every route.

use std::marker::PhantomData;

use acton_reactive::prelude::ActorRuntime;
use anyhow::Result;
use futures::future;

use crate::actors::WalkRule;
use crate::array::PartitionedArray;
use crate::config::EngineConfig;
use crate::payload::CellCounter;
use crate::route::{RouteId, SerialRoute};
use crate::walk::walk;

/// Value written to every visited cell.
pub const MARKED: u8 = 1;

/// Writes [`MARKED`] to each visited cell.
pub struct MarkCells<Id> {
    _route_id: PhantomData<fn() -> Id>,
}

impl<Id> Default for MarkCells<Id> {
    fn default() -> Self {
        Self {
            _route_id: PhantomData,
        }
    }
}

impl<Id: RouteId> WalkRule for MarkCells<Id> {
    type RouteId = Id;
    type Payload = CellCounter;
    type Output = u8;

    fn visit(&self, _route_id: Id, _payload: &mut CellCounter, cell_idx: usize, output: &mut [u8]) {
        output[cell_idx] = MARKED;
    }
}

/// Mark the first `n` cells of every route.
///
/// Cells past the budget and cells on no route stay no-data.
pub async fn first_n<Id: RouteId>(
    runtime: &mut ActorRuntime,
    config: &EngineConfig,
    route: &SerialRoute<Id>,
    n: u64,
) -> Result<PartitionedArray<u8>> {
    walk::<MarkCells<Id>, _, _>(runtime, config, route, CellCounter::new(n), |_| {
        future::ready(Ok::<_, anyhow::Error>(MarkCells::default()))
    })
    .await
}

/// Mark the `n` highest cells of every route.
///
/// The route must visit its cells in decreasing order of the ranking value;
/// marking the highest cells then is marking the first ones.
pub async fn highest_n<Id: RouteId>(
    runtime: &mut ActorRuntime,
    config: &EngineConfig,
    route: &SerialRoute<Id>,
    n: u64,
) -> Result<PartitionedArray<u8>> {
    first_n(runtime, config, route, n).await
}
