//! Fixed-window consumption with blocking.
//!
//! Every backend implements the same algorithm; the in-memory store runs
//! [`QuotaRecord::consume`] directly under a per-key lock and the Redis store
//! mirrors it in a server-side script.
//!
//! Rules:
//! - The first consume of an absent or expired window opens a new window of
//!   `policy.duration()`.
//! - A consume succeeds while `consumed_points < points`.
//! - The first consume over the limit marks the key blocked until
//!   `now + block_duration` (or, with a zero block duration, until the window ends).
//! - Rejections never increment `consumed_points`, so a blocked key cannot extend
//!   its own window.

use crate::domain::policy::Policy;
use serde::{Deserialize, Serialize};

/// Result of one consume call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// One point was consumed
    Consumed {
        /// Points left in the current window
        remaining: u32,
        /// Milliseconds until the window resets
        ms_before_next: u64,
    },
    /// The key is over its limit or blocked
    Rejected {
        /// Milliseconds the caller should wait before retrying
        retry_after_ms: u64,
    },
}

impl ConsumeOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ConsumeOutcome::Consumed { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, ConsumeOutcome::Rejected { .. })
    }

    /// Points remaining; always zero on rejection.
    pub fn remaining_points(&self) -> u32 {
        match self {
            ConsumeOutcome::Consumed { remaining, .. } => *remaining,
            ConsumeOutcome::Rejected { .. } => 0,
        }
    }

    /// Milliseconds before the next state change (window reset or unblock).
    pub fn ms_before_next(&self) -> u64 {
        match self {
            ConsumeOutcome::Consumed { ms_before_next, .. } => *ms_before_next,
            ConsumeOutcome::Rejected { retry_after_ms } => *retry_after_ms,
        }
    }
}

/// Stored consumption state for one key under one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRecord {
    /// Points consumed in the current window
    pub consumed_points: u32,
    /// Epoch milliseconds at which the window ends
    pub window_expires_at_ms: u64,
    /// Epoch milliseconds until which the key is blocked
    pub blocked_until_ms: Option<u64>,
}

impl QuotaRecord {
    /// Whether the key is blocked at `now_ms`.
    pub fn is_blocked(&self, now_ms: u64) -> bool {
        self.blocked_until_ms.is_some_and(|until| until > now_ms)
    }

    /// Epoch milliseconds after which the record carries no state.
    pub fn expires_at_ms(&self) -> u64 {
        self.window_expires_at_ms
            .max(self.blocked_until_ms.unwrap_or(0))
    }

    /// Whether the record can be discarded at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms() <= now_ms
    }

    /// Apply one consume to `current` and return the new record with the outcome.
    ///
    /// A rejected consume returns the record unchanged except for a freshly set
    /// block, so callers may store the result unconditionally.
    pub fn consume(
        current: Option<QuotaRecord>,
        policy: &Policy,
        now_ms: u64,
    ) -> (QuotaRecord, ConsumeOutcome) {
        if let Some(record) = current {
            if let Some(until) = record.blocked_until_ms.filter(|until| *until > now_ms) {
                return (
                    record,
                    ConsumeOutcome::Rejected {
                        retry_after_ms: until - now_ms,
                    },
                );
            }
        }

        let mut record = match current {
            Some(record) if record.window_expires_at_ms > now_ms => QuotaRecord {
                blocked_until_ms: None,
                ..record
            },
            _ => QuotaRecord {
                consumed_points: 0,
                window_expires_at_ms: now_ms.saturating_add(policy.duration_ms()),
                blocked_until_ms: None,
            },
        };

        if record.consumed_points < policy.points() {
            record.consumed_points += 1;
            let outcome = ConsumeOutcome::Consumed {
                remaining: policy.points() - record.consumed_points,
                ms_before_next: record.window_expires_at_ms - now_ms,
            };
            return (record, outcome);
        }

        let block_ms = policy.block_duration_ms();
        let until = if block_ms > 0 {
            let until = now_ms.saturating_add(block_ms);
            record.blocked_until_ms = Some(until);
            until
        } else {
            record.window_expires_at_ms
        };

        (
            record,
            ConsumeOutcome::Rejected {
                retry_after_ms: until.saturating_sub(now_ms).max(1),
            },
        )
    }
}
