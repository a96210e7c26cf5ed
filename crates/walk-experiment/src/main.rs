//! Walk Experiment CLI.
//!
//! Commands:
//! - first-n: Mark the first cells of every zone route
//! - integrate: Integrate a random raster along every zone route
//! - unique-id: Number random flags in completion order

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use route_walk::EngineConfig;
use walk_experiment::experiment::{Algorithm, ExperimentRunner, ExperimentRunnerConfig};
use walk_experiment::generator::GeneratorConfig;
use walk_experiment::results::{format_duration, RunResult};

/// Generate a timestamped output path from the given path.
/// e.g., "run.json" -> "run-20260108-010530.json"
fn timestamped_path(path: &Path) -> PathBuf {
    let timestamp = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("run");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("json");
    let parent = path.parent().unwrap_or(Path::new("."));
    parent.join(format!("{}-{}.{}", stem, timestamp, ext))
}

#[derive(Parser)]
#[command(name = "walk-experiment")]
#[command(version)]
#[command(about = "Route walks over partitioned rasters")]
struct Cli {
    /// Raster rows
    #[arg(long, global = true, default_value = "64")]
    rows: usize,

    /// Raster columns
    #[arg(long, global = true, default_value = "64")]
    cols: usize,

    /// Rows per partition
    #[arg(long, global = true, default_value = "16")]
    partition_rows: usize,

    /// Columns per partition
    #[arg(long, global = true, default_value = "16")]
    partition_cols: usize,

    /// Number of simulated nodes (overrides the config file)
    #[arg(long, global = true, env = "WALK_NODES")]
    nodes: Option<usize>,

    /// Number of zone bands, one route each
    #[arg(long, global = true, default_value = "8")]
    zones: usize,

    /// Random seed
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output file for the run result
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mark the first n cells of every route
    FirstN {
        /// Cells to mark per route
        #[arg(short, default_value = "100")]
        n: u64,
    },

    /// Integrate a random raster along every route
    Integrate {
        /// Maximum cells per route
        #[arg(long, default_value_t = u64::MAX)]
        max_cells: u64,
    },

    /// Assign unique ids to random flags
    UniqueId,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let mut engine = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(nodes) = cli.nodes {
        engine.nr_nodes = nodes;
    }

    let algorithm = match cli.command {
        Commands::FirstN { n } => Algorithm::FirstN { n },
        Commands::Integrate { max_cells } => Algorithm::Integrate {
            max_nr_cells: max_cells,
        },
        Commands::UniqueId => Algorithm::UniqueId,
    };

    let config = ExperimentRunnerConfig {
        generator: GeneratorConfig {
            rows: cli.rows,
            cols: cli.cols,
            partition_rows: cli.partition_rows,
            partition_cols: cli.partition_cols,
            zones: cli.zones,
            ..Default::default()
        },
        engine,
        ..Default::default()
    };

    let seed = cli.seed.unwrap_or_else(rand::random);
    let runner = ExperimentRunner::new(config);
    let result = runner.run(algorithm, seed).await?;

    print_result(&result);

    if let Some(output) = cli.output {
        let output_path = timestamped_path(&output);
        result.save(&output_path)?;
        info!(path = %output_path.display(), "Saved run result");
    }

    Ok(())
}

fn print_result(result: &RunResult) {
    println!("\n=== Walk Result ===");
    println!("Algorithm: {}", result.algorithm);
    println!(
        "Raster: {}x{} in {} partitions of {}x{} on {} nodes",
        result.shape[0],
        result.shape[1],
        result.nr_partitions,
        result.partition_shape[0],
        result.partition_shape[1],
        result.nr_nodes
    );
    println!("Routes: {}", result.nr_routes);
    println!("Seed: {}", result.seed);
    println!("Duration: {}", format_duration(result.duration_ms));

    let summary = &result.summary;
    println!("\nOutput:");
    println!("  Cells written: {}", summary.cells_written);
    println!("  No-data cells: {}", summary.no_data_cells);
    println!("  Sum: {:.2}", summary.sum);
    if let Some(max) = summary.max {
        println!("  Max: {:.2}", max);
    }

    if !summary.id_assignments.is_empty() {
        println!("\nId ranges (in assignment order):");
        for assignment in &summary.id_assignments {
            match assignment.last() {
                Some(last) => println!(
                    "  partition {:>4}: {}..={}",
                    assignment.partition.0, assignment.first, last
                ),
                None => println!("  partition {:>4}: none", assignment.partition.0),
            }
        }
    }
}
