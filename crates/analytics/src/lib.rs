//! # Sentinel Analytics
//!
//! Derives the service summary from the engine's raw bookkeeping: nearest-rank
//! latency percentiles, SLA breach accounting, status counts, per-spec health
//! and an overall health classification.
//!
//! ## Architectural Principles
//!
//! - **Layer 1 Logic:** This is a pure logic crate. It has no knowledge of
//!   transports, storage or time; it depends only on `core-types`.
//! - **Stateless Calculation:** `SummaryEngine` takes specs, results, latency
//!   history and circuit views as input and produces a `Summary` as output.

// Declare the modules that constitute this crate.
pub mod engine;
pub mod report;

// Re-export the key components to create a clean, public-facing API.
pub use engine::{LatencyHistory, SummaryEngine, SummaryInput, percentile, sla_breakdown};
pub use report::{
    CircuitView, LatencyPercentiles, ServiceHealth, SlaBreakdown, SpecHealth, SpecSla,
    StatusCounts, Summary,
};
