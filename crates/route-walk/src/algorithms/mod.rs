//! Algorithms built on the route walk engine.
//!
//! `first_n`, `highest_n` and `integrate` differ from each other only in
//! their payload and per-cell write rule. `unique_id` uses completion-ordered
//! scheduling instead of walking routes.

pub mod first_n;
pub mod integrate;
pub mod unique_id;

pub use first_n::{first_n, highest_n, MarkCells, MARKED};
pub use integrate::{integrate, Integrand, IntegrateRule};
pub use unique_id::{schedule_unique_ids, unique_id, IdAssignment, UniqueIds, FIRST_ID};
