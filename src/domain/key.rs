//! Rate limit keys and caller identity.
//!
//! A key is the identity string a policy is evaluated against, rendered as
//! `scheme:id`. When several identities are known, the most specific one wins:
//! authenticated user, then API client, then source IP.

use std::fmt;
use std::str::FromStr;

/// Identity scheme of a rate limit key, most specific first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyScheme {
    User,
    Api,
    Ip,
}

impl KeyScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyScheme::User => "user",
            KeyScheme::Api => "api",
            KeyScheme::Ip => "ip",
        }
    }
}

/// Error returned when parsing a malformed key string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyParseError {
    /// No `:` separator between scheme and id
    MissingSeparator,
    /// Scheme is not one of user, api or ip
    UnknownScheme(String),
    /// Empty id after the separator
    EmptyId,
}

impl fmt::Display for KeyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyParseError::MissingSeparator => write!(f, "key must have the form scheme:id"),
            KeyParseError::UnknownScheme(s) => write!(f, "unknown key scheme: {}", s),
            KeyParseError::EmptyId => write!(f, "key id must not be empty"),
        }
    }
}

impl std::error::Error for KeyParseError {}

/// Identity string a policy is evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RateLimitKey {
    scheme: KeyScheme,
    id: String,
}

impl RateLimitKey {
    pub fn new(scheme: KeyScheme, id: impl Into<String>) -> Self {
        Self {
            scheme,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(KeyScheme::User, id)
    }

    pub fn api(id: impl Into<String>) -> Self {
        Self::new(KeyScheme::Api, id)
    }

    pub fn ip(addr: impl Into<String>) -> Self {
        Self::new(KeyScheme::Ip, addr)
    }

    pub fn scheme(&self) -> KeyScheme {
        self.scheme
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme.as_str(), self.id)
    }
}

impl FromStr for RateLimitKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, id) = s.split_once(':').ok_or(KeyParseError::MissingSeparator)?;
        if id.is_empty() {
            return Err(KeyParseError::EmptyId);
        }
        let scheme = match scheme {
            "user" => KeyScheme::User,
            "api" => KeyScheme::Api,
            "ip" => KeyScheme::Ip,
            other => return Err(KeyParseError::UnknownScheme(other.to_string())),
        };
        Ok(Self::new(scheme, id))
    }
}

/// Caller identity as resolved by the surrounding HTTP layer.
///
/// The core never parses raw HTTP; every field is supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Option<String>,
    pub api_client_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

/// Fallback id used when a request carries no identity at all.
pub const UNKNOWN_IP: &str = "unknown";

impl Identity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_api_client(mut self, client_id: impl Into<String>) -> Self {
        self.api_client_id = Some(client_id.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Resolve the key this identity is limited under (user > api client > ip).
    pub fn rate_limit_key(&self) -> RateLimitKey {
        if let Some(user) = non_empty(&self.user_id) {
            RateLimitKey::user(user)
        } else if let Some(client) = non_empty(&self.api_client_id) {
            RateLimitKey::api(client)
        } else {
            RateLimitKey::ip(non_empty(&self.ip).unwrap_or(UNKNOWN_IP))
        }
    }

    /// Key used for failure tracking: the source address when known.
    ///
    /// Failures are tracked per address so that escalation can produce an
    /// IP blacklist entry even for authenticated callers.
    pub fn failure_key(&self) -> RateLimitKey {
        match non_empty(&self.ip) {
            Some(ip) => RateLimitKey::ip(ip),
            None => self.rate_limit_key(),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
