//! Domain layer - pure business logic with no I/O.
//!
//! This layer contains the core concepts and invariants of admission control:
//! - Rate limit keys and caller identity
//! - Quota policies, tiers and the fixed-window consumption algorithm
//! - Behavior samples and suspicion scoring
//! - Blacklist entries
//! - The error taxonomy shared by every component
//!
//! All types in this layer are pure and easily testable.

pub mod behavior;
pub mod blacklist;
pub mod error;
pub mod key;
pub mod policy;
pub mod quota;
