//! Route Walk: order-dependent computations along routes over partitioned rasters.
//!
//! A route is a sequence of cells visited strictly in order. Routes may cross
//! partition boundaries any number of times. This crate drives every route's
//! walk with one actor per partition:
//! - Each actor owns its output partition and its routes' progress
//! - Routes travel between actors as fire-and-forget messages
//! - Callers get the output array immediately, partitions resolve as walks finish
//!
//! Global unique numbering uses completion-ordered scheduling instead: the
//! partition whose count is known first gets the next id range.

pub mod actors;
pub mod algorithms;
pub mod array;
pub mod config;
pub mod engine;
pub mod messages;
pub mod payload;
pub mod placement;
pub mod promise;
pub mod route;
pub mod walk;

pub use array::{
    ArrayPartition, Cell, Element, PartitionHandle, PartitionId, PartitionedArray, Partitioning,
    Shape,
};
pub use config::EngineConfig;
pub use engine::WalkEngine;
pub use payload::{Accumulator, CellCounter, IntegrateData, Payload};
pub use placement::{Localities, NodeId, Placement, RoundRobin};
pub use route::{RouteFragment, RouteId, RoutePartition, SerialRoute};
