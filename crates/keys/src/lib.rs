//! # Grounding Keys
//!
//! Run-time discovery of which payload fields carry a path, a line number, a
//! snippet, a row count or a row container.
//!
//! ```text
//! schema contract ──┐
//! inferred columns ─┼──> KeyRegistry (additive, capped per role) ──> row accessors
//! observed payloads ┘            │
//!                                └──> KeyMapSnapshot / fail-closed check
//! ```
//!
//! The registry is an explicit value owned by one run and passed to every consumer;
//! there is no process-wide key state.

pub mod classify;
mod contract;
mod error;
mod policy;
mod registry;
mod role;
mod snapshot;

pub use contract::SchemaContract;
pub use error::{KeyError, Result};
pub use policy::{BaseKeys, DiscoveryPolicy, MIN_KEYS_PER_ROLE};
pub use registry::{
    discover, scalar_text, value_as_i64, KeyRegistry, Row, ROW_CONTAINER_HINT_KEY,
};
pub use role::{KeyRole, RoleKeys};
pub use snapshot::KeyMapSnapshot;
