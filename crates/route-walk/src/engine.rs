//! Configured entry point to the walk algorithms.
//!
//! ## Usage
//!
//! ```ignore
//! use acton_reactive::prelude::*;
//! use route_walk::{EngineConfig, SerialRoute, WalkEngine};
//!
//! let mut runtime = ActonApp::launch_async().await;
//! let engine = WalkEngine::new(EngineConfig::default());
//!
//! let route = SerialRoute::from_cell_routes(partitioning, &engine.placement(), routes)?;
//! let marked = engine.first_n(&mut runtime, &route, 10).await?;
//! let cells = marked.to_dense().await?;
//! ```

use acton_reactive::prelude::ActorRuntime;
use anyhow::Result;

use crate::algorithms::{self, Integrand, UniqueIds};
use crate::array::PartitionedArray;
use crate::config::EngineConfig;
use crate::placement::RoundRobin;
use crate::route::{RouteId, SerialRoute};

/// Runs walk algorithms with one configuration.
#[derive(Debug, Clone, Default)]
pub struct WalkEngine {
    config: EngineConfig,
}

impl WalkEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Placement matching the configured number of nodes. Use it to build
    /// routes and inputs so they are co-located.
    pub fn placement(&self) -> RoundRobin {
        self.config.placement()
    }

    pub async fn first_n<Id: RouteId>(
        &self,
        runtime: &mut ActorRuntime,
        route: &SerialRoute<Id>,
        n: u64,
    ) -> Result<PartitionedArray<u8>> {
        algorithms::first_n(runtime, &self.config, route, n).await
    }

    pub async fn highest_n<Id: RouteId>(
        &self,
        runtime: &mut ActorRuntime,
        route: &SerialRoute<Id>,
        n: u64,
    ) -> Result<PartitionedArray<u8>> {
        algorithms::highest_n(runtime, &self.config, route, n).await
    }

    pub async fn integrate<Id: RouteId, V: Integrand>(
        &self,
        runtime: &mut ActorRuntime,
        route: &SerialRoute<Id>,
        integrand: &PartitionedArray<V>,
        max_nr_cells: u64,
    ) -> Result<PartitionedArray<V>> {
        algorithms::integrate(runtime, &self.config, route, integrand, max_nr_cells).await
    }

    pub fn unique_id(&self, condition: &PartitionedArray<u8>) -> PartitionedArray<u64> {
        algorithms::unique_id(condition)
    }

    pub fn schedule_unique_ids(&self, condition: &PartitionedArray<u8>) -> UniqueIds {
        algorithms::schedule_unique_ids(condition)
    }
}
