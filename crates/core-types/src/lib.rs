//! # Sentinel Core Types
//!
//! The Layer 0 data model shared by every other crate in the workspace:
//! declarative contract-test specs, the results a probe produces, and the
//! schema types used to validate response bodies.
//!
//! This crate contains no I/O and no async code.

pub mod enums;
pub mod error;
pub mod result;
pub mod schema;
pub mod spec;

// Re-export the core types to provide a clean public API.
pub use enums::{HttpMethod, JsonType, TestStatus};
pub use error::CoreError;
pub use result::ContractTestResult;
pub use schema::DeepSchema;
pub use spec::{
    CircuitBreakerConfig, ContractTestSpec, DEFAULT_MAX_LATENCY_MS, Enabled, ExpectedStatus,
    SpecOverride,
};
