//! Identifier key generation and handling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The limiter a request is counted against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Customer self-service portal
    Portal,
    /// General API
    Api,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Portal => "portal",
            Scope::Api => "api",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown scope name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown rate limit scope: {0}")]
pub struct UnknownScope(pub String);

impl FromStr for Scope {
    type Err = UnknownScope;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portal" => Ok(Scope::Portal),
            "api" => Ok(Scope::Api),
            other => Err(UnknownScope(other.to_string())),
        }
    }
}

/// A key that scopes one client's window.
///
/// The key is the scope tag followed by the subject, for example
/// `portal:cust-1`. Tags keep subjects from different scopes apart even when
/// limiters share a store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    key: String,
}

impl Identifier {
    /// Create an identifier for `subject` within `scope`.
    pub fn new(scope: Scope, subject: &str) -> Self {
        Self {
            key: format!("{}:{}", scope.as_str(), subject),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}
