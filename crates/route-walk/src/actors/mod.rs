//! Acton-reactive actors for route walks.
//!
//! One walk actor owns each route partition. A walk travels as messages:
//!
//! ```text
//! driver
//!   ├─ SetDownstreamComponents → every WalkActor (before any walk)
//!   └─ WalkRoute(route, payload) → WalkActor owning the route's start
//!        ├─ budget left      → WalkRoute → downstream WalkActor
//!        ├─ budget exhausted → SkipRouteFragments → downstream WalkActor
//!        └─ last fragment    → nothing
//!
//! rule task (only for rules whose inputs are still pending)
//!   ├─ inputs ready  → SetWalkRule → its WalkActor (replays queued walks)
//!   └─ inputs failed → AbandonWalk → every WalkActor
//! ```
//!
//! An actor publishes its output partition once every fragment of every
//! route passing through it has been walked or skipped.

mod walk_actor;

pub use walk_actor::{Forward, Handoff, WalkActor, WalkActorState, WalkComponent, WalkRule};
