//! Synthetic routed rasters.
//!
//! The raster is cut into horizontal zone bands. Each band holds one route
//! that snakes through the band row by row, so it crosses every partition
//! column boundary once per row.

use anyhow::{bail, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use route_walk::{Cell, Element, PartitionedArray, Partitioning, Placement, SerialRoute};

/// Configuration for generating routed rasters.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Raster rows.
    pub rows: usize,
    /// Raster columns.
    pub cols: usize,
    /// Rows per partition.
    pub partition_rows: usize,
    /// Columns per partition.
    pub partition_cols: usize,
    /// Number of zone bands, one route each.
    pub zones: usize,
    /// Fraction of input cells holding no-data (0.0 to 1.0).
    pub no_data_fraction: f64,
    /// Fraction of condition cells that are flagged (0.0 to 1.0).
    pub flag_fraction: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            rows: 64,
            cols: 64,
            partition_rows: 16,
            partition_cols: 16,
            zones: 8,
            no_data_fraction: 0.05,
            flag_fraction: 0.3,
        }
    }
}

/// Generator for routes and input rasters.
pub struct RasterGenerator {
    config: GeneratorConfig,
    rng: ChaCha8Rng,
}

impl RasterGenerator {
    /// Create a new generator with the given config and seed.
    pub fn new(config: GeneratorConfig, seed: u64) -> Self {
        Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub fn partitioning(&self) -> Result<Partitioning> {
        if self.config.rows == 0 || self.config.cols == 0 {
            bail!(
                "raster of {}x{} cells has nothing to walk",
                self.config.rows,
                self.config.cols
            );
        }
        Partitioning::new(
            [self.config.rows, self.config.cols],
            [self.config.partition_rows, self.config.partition_cols],
        )
    }

    /// Cells of every zone route, in visiting order.
    ///
    /// Zones split the rows as evenly as possible. Zones left without rows
    /// (more zones than rows) get no route.
    pub fn zone_routes(&self) -> Vec<(u32, Vec<Cell>)> {
        let rows = self.config.rows;
        let cols = self.config.cols;
        let zones = self.config.zones.max(1);

        (0..zones)
            .filter_map(|zone| {
                let first_row = zone * rows / zones;
                let end_row = (zone + 1) * rows / zones;
                if first_row == end_row {
                    return None;
                }

                let cells = (first_row..end_row)
                    .enumerate()
                    .flat_map(|(i, row)| {
                        let mut row_cells: Vec<Cell> = (0..cols).map(|col| [row, col]).collect();
                        if i % 2 == 1 {
                            row_cells.reverse();
                        }
                        row_cells
                    })
                    .collect();

                Some((zone as u32, cells))
            })
            .collect()
    }

    pub fn route(&self, placement: &impl Placement) -> Result<SerialRoute<u32>> {
        SerialRoute::from_cell_routes(self.partitioning()?, placement, self.zone_routes())
    }

    /// Random values in `[0, 10)`, with some no-data cells.
    pub fn integrand(&mut self, placement: &impl Placement) -> Result<PartitionedArray<f64>> {
        let partitioning = self.partitioning()?;
        let no_data_fraction = self.config.no_data_fraction.clamp(0.0, 1.0);
        let rng = &mut self.rng;

        Ok(PartitionedArray::from_fn(partitioning, placement, |_| {
            if rng.random_bool(no_data_fraction) {
                f64::NO_DATA
            } else {
                rng.random_range(0.0..10.0)
            }
        }))
    }

    /// Random flags: no-data, 0, or 1.
    pub fn condition(&mut self, placement: &impl Placement) -> Result<PartitionedArray<u8>> {
        let partitioning = self.partitioning()?;
        let no_data_fraction = self.config.no_data_fraction.clamp(0.0, 1.0);
        let flag_fraction = self.config.flag_fraction.clamp(0.0, 1.0);
        let rng = &mut self.rng;

        Ok(PartitionedArray::from_fn(partitioning, placement, |_| {
            if rng.random_bool(no_data_fraction) {
                u8::NO_DATA
            } else if rng.random_bool(flag_fraction) {
                1
            } else {
                0
            }
        }))
    }
}
