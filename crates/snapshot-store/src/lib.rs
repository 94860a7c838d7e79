//! # Sentinel Snapshot Store
//!
//! The engine's local, best-effort persistence: one JSON snapshot of the
//! rolling result log and latency history per service, plus a per-service map
//! of runtime latency-budget overrides.
//!
//! ## Architectural Principles
//!
//! - **Adapter:** callers only see the `SnapshotStore` trait; the file layout
//!   is private to `FileSnapshotStore`.
//! - **Session-scoped breakers:** circuit-breaker state is deliberately not
//!   part of a snapshot.
//!
//! ## Public API
//!
//! - `SnapshotStore`: load/save snapshots and overrides by service id.
//! - `FileSnapshotStore`: one JSON file per service and document kind.
//! - `MemorySnapshotStore`: an in-process store for tests and ephemeral runs.
//! - `StoreError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod error;
pub mod snapshot;
pub mod store;

// Re-export the key components to create a clean, public-facing API.
pub use error::StoreError;
pub use snapshot::{OverrideMap, ServiceSnapshot};
pub use store::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
