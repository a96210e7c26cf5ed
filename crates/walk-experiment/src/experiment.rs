//! Experiment runner for route walk runs.
//!
//! Orchestrates one run:
//! 1. Generate the routed raster and its input
//! 2. Launch the actor runtime and run the algorithm
//! 3. Wait for every output partition
//! 4. Summarize the output

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use acton_reactive::prelude::*;
use route_walk::{EngineConfig, WalkEngine};

use crate::generator::{GeneratorConfig, RasterGenerator};
use crate::results::{OutputSummary, RunResult};

/// Algorithm to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Mark the first `n` cells of every route
    FirstN { n: u64 },
    /// Running sums of a random integrand along routes
    Integrate { max_nr_cells: u64 },
    /// Completion-ordered unique ids for random flags
    UniqueId,
}

impl Algorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::FirstN { .. } => "first_n",
            Algorithm::Integrate { .. } => "integrate",
            Algorithm::UniqueId => "unique_id",
        }
    }
}

/// Configuration for the experiment runner.
#[derive(Debug, Clone)]
pub struct ExperimentRunnerConfig {
    /// Synthetic input layout
    pub generator: GeneratorConfig,
    /// Engine settings
    pub engine: EngineConfig,
    /// Upper bound on waiting for the output
    pub timeout: Duration,
}

impl Default for ExperimentRunnerConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            engine: EngineConfig::default(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Runs a single algorithm on freshly generated input.
pub struct ExperimentRunner {
    config: ExperimentRunnerConfig,
}

impl ExperimentRunner {
    pub fn new(config: ExperimentRunnerConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, algorithm: Algorithm, seed: u64) -> Result<RunResult> {
        let engine = WalkEngine::new(self.config.engine.clone());
        let mut generator = RasterGenerator::new(self.config.generator.clone(), seed);
        let partitioning = generator.partitioning()?;

        info!(
            algorithm = algorithm.name(),
            rows = partitioning.array_shape()[0],
            cols = partitioning.array_shape()[1],
            partitions = partitioning.nr_partitions(),
            nodes = self.config.engine.nr_nodes,
            seed,
            "Starting run"
        );

        let mut runtime = ActonApp::launch_async().await;
        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = self
            .run_algorithm(&engine, &mut runtime, &mut generator, algorithm)
            .await;

        let duration_ms = start.elapsed().as_millis() as u64;
        let _ = runtime.shutdown_all().await;
        let (nr_routes, summary) = outcome?;

        info!(
            algorithm = algorithm.name(),
            duration_ms,
            cells_written = summary.cells_written,
            "Run complete"
        );

        Ok(RunResult {
            algorithm: algorithm.name().to_string(),
            started_at,
            ended_at: Utc::now(),
            duration_ms,
            shape: partitioning.array_shape(),
            partition_shape: partitioning.partition_shape(),
            nr_partitions: partitioning.nr_partitions(),
            nr_nodes: self.config.engine.nr_nodes,
            nr_routes,
            seed,
            summary,
        })
    }

    async fn run_algorithm(
        &self,
        engine: &WalkEngine,
        runtime: &mut ActorRuntime,
        generator: &mut RasterGenerator,
        algorithm: Algorithm,
    ) -> Result<(usize, OutputSummary)> {
        let placement = engine.placement();
        let timeout = self.config.timeout;

        match algorithm {
            Algorithm::FirstN { n } => {
                let route = generator.route(&placement)?;
                let marked = engine.first_n(runtime, &route, n).await?;
                let cells = tokio::time::timeout(timeout, marked.to_dense())
                    .await
                    .context("first_n output did not resolve in time")??;
                Ok((route.nr_routes(), OutputSummary::from_cells(&cells)))
            }
            Algorithm::Integrate { max_nr_cells } => {
                let route = generator.route(&placement)?;
                let integrand = generator.integrand(&placement)?;
                let sums = engine
                    .integrate(runtime, &route, &integrand, max_nr_cells)
                    .await?;
                let cells = tokio::time::timeout(timeout, sums.to_dense())
                    .await
                    .context("integrate output did not resolve in time")??;
                Ok((route.nr_routes(), OutputSummary::from_cells(&cells)))
            }
            Algorithm::UniqueId => {
                let condition = generator.condition(&placement)?;
                let run = engine.schedule_unique_ids(&condition);
                let ids = tokio::time::timeout(timeout, run.ids.to_dense())
                    .await
                    .context("unique_id output did not resolve in time")??;
                let assignments = run.assignments().await?;
                Ok((0, OutputSummary::from_ids(&ids, assignments)))
            }
        }
    }
}
