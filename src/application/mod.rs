//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Rate limiter and adaptive controller (quota decisions)
//! - Behavior analyzer, blacklist and failure tracker (abuse handling)
//! - Circuit breakers and their registry (dependency protection)
//! - Metrics, reporter and the admission pipeline
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod adaptive;
pub mod behavior;
pub mod blacklist;
pub mod circuit_breaker;
pub mod failure_tracker;
pub mod guard;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod registry;
pub mod reporter;
