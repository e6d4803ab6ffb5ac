//! Deny-list entries.
//!
//! Entries are deactivated rather than deleted so the audit trail stays intact.

use crate::domain::key::{Identity, KeyScheme, RateLimitKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of value an entry matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlacklistType {
    Ip,
    UserAgent,
    Email,
    CardFingerprint,
}

impl BlacklistType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlacklistType::Ip => "IP",
            BlacklistType::UserAgent => "USER_AGENT",
            BlacklistType::Email => "EMAIL",
            BlacklistType::CardFingerprint => "CARD_FINGERPRINT",
        }
    }

    /// Blacklist type a failure-tracking key escalates to, if any.
    pub fn for_key(key: &RateLimitKey) -> Option<Self> {
        match key.scheme() {
            KeyScheme::Ip => Some(BlacklistType::Ip),
            KeyScheme::User | KeyScheme::Api => None,
        }
    }

    /// Canonical form of a value of this type, so lookups are case-stable.
    pub fn normalize(&self, value: &str) -> String {
        match self {
            BlacklistType::Email => value.trim().to_ascii_lowercase(),
            BlacklistType::Ip | BlacklistType::CardFingerprint | BlacklistType::UserAgent => {
                value.trim().to_string()
            }
        }
    }
}

impl fmt::Display for BlacklistType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlacklistType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IP" => Ok(BlacklistType::Ip),
            "USER_AGENT" => Ok(BlacklistType::UserAgent),
            "EMAIL" => Ok(BlacklistType::Email),
            "CARD_FINGERPRINT" => Ok(BlacklistType::CardFingerprint),
            other => Err(format!("unknown blacklist type: {}", other)),
        }
    }
}

/// One deny-list record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub entry_type: BlacklistType,
    pub value: String,
    pub reason: String,
    pub is_active: bool,
    pub created_at_ms: u64,
    pub expires_at_ms: Option<u64>,
}

impl BlacklistEntry {
    pub fn new(
        entry_type: BlacklistType,
        value: &str,
        reason: impl Into<String>,
        created_at_ms: u64,
        expires_at_ms: Option<u64>,
    ) -> Self {
        Self {
            entry_type,
            value: entry_type.normalize(value),
            reason: reason.into(),
            is_active: true,
            created_at_ms,
            expires_at_ms,
        }
    }

    /// Whether the entry denies traffic at `now_ms`.
    pub fn is_effective(&self, now_ms: u64) -> bool {
        self.is_active && self.expires_at_ms.map_or(true, |expires| expires > now_ms)
    }
}

/// Request attributes checked against the deny-list on every request.
pub fn request_identities(identity: &Identity) -> Vec<(BlacklistType, String)> {
    let mut identities = Vec::with_capacity(2);
    if let Some(ip) = identity.ip.as_deref().filter(|v| !v.trim().is_empty()) {
        identities.push((BlacklistType::Ip, BlacklistType::Ip.normalize(ip)));
    }
    if let Some(agent) = identity
        .user_agent
        .as_deref()
        .filter(|v| !v.trim().is_empty())
    {
        identities.push((
            BlacklistType::UserAgent,
            BlacklistType::UserAgent.normalize(agent),
        ));
    }
    identities
}
