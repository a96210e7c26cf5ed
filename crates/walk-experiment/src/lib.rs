//! Walk Experiment: synthetic runs of the route walk engine.
//!
//! This crate drives `route-walk` end to end:
//! - Generates serpentine zone routes and random input rasters
//! - Runs one algorithm on a fresh actor runtime
//! - Records timings and an output summary as JSON

pub mod experiment;
pub mod generator;
pub mod results;
