//! # Sentinel Events
//!
//! This crate defines the side-channel messages the contract-test engine emits:
//! alerts for hard failures and severe SLA breaches, and a notification for
//! every completed batch.
//!
//! As a Layer 0 crate, it depends only on `core-types`.

// Declare the modules that make up this crate.
pub mod error;
pub mod messages;

// Re-export the core types to provide a clean public API.
pub use error::EventsError;
pub use messages::{
    AlertEvent, AlertReason, BatchCompleted, LogLevel, LogMessage, ProbeMessage, SpecRef,
};
