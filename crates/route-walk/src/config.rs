//! Configuration types for the walk engine.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::placement::RoundRobin;

/// Top-level engine configuration.
///
/// Loaded from JSON at runtime; every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of simulated nodes partitions are spread over
    pub nr_nodes: usize,

    /// Validate routes before spawning walk actors. Routes assembled with
    /// `SerialRoute::new` are not checked anywhere else
    pub validate_routes: bool,

    /// Prefix for walk actor names
    pub actor_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            nr_nodes: 1,
            validate_routes: true,
            actor_name_prefix: "Walk".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        serde_json::from_str(&json)
            .with_context(|| format!("parsing engine config {}", path.display()))
    }

    /// Placement of partitions over the configured nodes.
    pub fn placement(&self) -> RoundRobin {
        RoundRobin::new(self.nr_nodes)
    }
}
