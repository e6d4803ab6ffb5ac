//! Behavior samples and suspicion scoring.
//!
//! A suspicion score is derived on demand from a key's trailing request history
//! and is never persisted. Detectors are additive:
//!
//! | Detector              | Condition                                | Score |
//! |-----------------------|------------------------------------------|-------|
//! | `endpoint_scanning`   | more than 20 distinct paths visited      | +30   |
//! | `injection_attempt`   | a query value matches an injection signature | +50 |

use ahash::AHashSet;
use once_cell::sync::Lazy;
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Distinct paths a key may visit before it counts as scanning.
pub const ENDPOINT_SCAN_THRESHOLD: usize = 20;
/// Score added by the endpoint scanning detector.
pub const ENDPOINT_SCAN_SCORE: u32 = 30;
/// Score added by the injection detector.
pub const INJECTION_SCORE: u32 = 50;

/// Curated SQL and script injection signatures, matched case-insensitively.
static INJECTION_SIGNATURES: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?i)\bunion\b[\s\S]*\bselect\b",
        r"(?i)\bselect\b[\s\S]+\bfrom\b",
        r"(?i)\b(insert\s+into|delete\s+from|drop\s+(table|database)|update\s+\w+\s+set)\b",
        r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
        r"(?i)\b(or|and)\s+\d+\s*=\s*\d+",
        r"(?i)'\s*(--|#|/\*)",
        r"(?i)\)\s*(--|/\*)\s*$",
        r"(?i)\b(sleep|benchmark|pg_sleep|waitfor\s+delay)\s*\(",
        r"(?i)<\s*/?\s*script\b",
        r"(?i)javascript\s*:",
        r"(?i)\bon(error|load|click|mouseover)\s*=",
        r"(?i)<\s*(iframe|img|svg)\b[^>]*>",
    ])
    .unwrap_or_else(|_| RegexSet::empty())
});

/// Whether a single value matches any curated injection signature.
pub fn matches_injection_signature(value: &str) -> bool {
    !value.is_empty() && INJECTION_SIGNATURES.is_match(value)
}

/// One recorded request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorSample {
    pub path: String,
    pub method: String,
    pub query_params: BTreeMap<String, String>,
    pub timestamp_ms: u64,
}

impl BehaviorSample {
    pub fn new(path: impl Into<String>, method: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            query_params: BTreeMap::new(),
            timestamp_ms,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }
}

/// Anomaly pattern that contributed to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SuspicionPattern {
    EndpointScanning,
    InjectionAttempt,
}

impl SuspicionPattern {
    /// Stable tag used in logs and reports.
    pub fn tag(&self) -> &'static str {
        match self {
            SuspicionPattern::EndpointScanning => "endpoint_scanning",
            SuspicionPattern::InjectionAttempt => "injection_attempt",
        }
    }
}

impl fmt::Display for SuspicionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Numeric anomaly estimate for a key plus the patterns that produced it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspicionScore {
    pub score: u32,
    pub patterns: BTreeSet<SuspicionPattern>,
}

impl SuspicionScore {
    /// Score of a key with no suspicious history.
    pub fn clean() -> Self {
        Self::default()
    }

    /// Run every detector over a history.
    pub fn evaluate(samples: &[BehaviorSample]) -> Self {
        let mut result = Self::clean();

        let distinct_paths: AHashSet<&str> = samples.iter().map(|s| s.path.as_str()).collect();
        if distinct_paths.len() > ENDPOINT_SCAN_THRESHOLD {
            result.add(SuspicionPattern::EndpointScanning, ENDPOINT_SCAN_SCORE);
        }

        let injected = samples
            .iter()
            .flat_map(|s| s.query_params.values())
            .any(|value| matches_injection_signature(value));
        if injected {
            result.add(SuspicionPattern::InjectionAttempt, INJECTION_SCORE);
        }

        result
    }

    fn add(&mut self, pattern: SuspicionPattern, score: u32) {
        if self.patterns.insert(pattern) {
            self.score = self.score.saturating_add(score);
        }
    }

    pub fn has(&self, pattern: SuspicionPattern) -> bool {
        self.patterns.contains(&pattern)
    }

    /// Pattern tags in stable order.
    pub fn tags(&self) -> Vec<&'static str> {
        self.patterns.iter().map(SuspicionPattern::tag).collect()
    }
}
