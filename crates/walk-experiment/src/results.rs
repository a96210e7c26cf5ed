//! Results collection and output for walk runs.
//!
//! Captures:
//! - Raster and partition layout
//! - Wall-clock time from start to fully resolved output
//! - A summary of the output raster

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use route_walk::algorithms::IdAssignment;
use route_walk::Element;

/// Results from a single walk run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// Algorithm name (e.g. "first_n")
    pub algorithm: String,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub ended_at: DateTime<Utc>,
    /// Time until every output partition resolved
    pub duration_ms: u64,
    /// Raster shape (rows, cols)
    pub shape: [usize; 2],
    /// Nominal partition shape (rows, cols)
    pub partition_shape: [usize; 2],
    pub nr_partitions: usize,
    pub nr_nodes: usize,
    /// Number of routes walked (zero for unique ids)
    pub nr_routes: usize,
    /// Seed used for the synthetic inputs
    pub seed: u64,
    pub summary: OutputSummary,
}

/// What ended up in the output raster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSummary {
    /// Cells holding a value
    pub cells_written: usize,
    /// Cells left no-data
    pub no_data_cells: usize,
    /// Sum over all written cells
    pub sum: f64,
    /// Largest written value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Id ranges in the order they were assigned (unique ids only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub id_assignments: Vec<IdAssignment>,
}

impl OutputSummary {
    /// Summarize a dense output raster.
    pub fn from_cells<T>(cells: &[T]) -> Self
    where
        T: Element + Into<f64>,
    {
        Self::from_values(cells.iter().map(|cell| {
            if cell.is_no_data() {
                None
            } else {
                Some((*cell).into())
            }
        }))
    }

    /// Summarize a dense id raster.
    pub fn from_ids(ids: &[u64], id_assignments: Vec<IdAssignment>) -> Self {
        let values = ids
            .iter()
            .map(|id| (!id.is_no_data()).then_some(*id as f64));
        Self {
            id_assignments,
            ..Self::from_values(values)
        }
    }

    fn from_values(values: impl Iterator<Item = Option<f64>>) -> Self {
        let mut summary = Self::default();

        for value in values {
            match value {
                Some(value) => {
                    summary.cells_written += 1;
                    summary.sum += value;
                    summary.max = Some(summary.max.map_or(value, |max| max.max(value)));
                }
                None => summary.no_data_cells += 1,
            }
        }

        summary
    }
}

impl RunResult {
    /// Save results to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .with_context(|| format!("writing results to {}", path.display()))?;
        Ok(())
    }

    /// Load results from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let result = serde_json::from_str(&json)?;
        Ok(result)
    }
}

/// Format a duration in milliseconds for display.
pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}
