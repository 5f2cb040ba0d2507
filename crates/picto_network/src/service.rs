//! Discovery scoping keys.
//!
//! Every room advertises and browses under its own [`ServiceType`]. Peers only
//! see advertisers with an identical key, which is what keeps rooms apart on
//! the wire. Keys follow the Bonjour service-type rules: at most 15
//! characters of lowercase ASCII letters, digits and hyphens, with at least one
//! letter and no leading, trailing or doubled hyphen.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NetworkError;

/// Prefix shared by every room's key so other services on the LAN never match.
pub const SERVICE_PREFIX: &str = "picto";

/// Longest key the discovery layer accepts.
pub const MAX_SERVICE_TYPE_LEN: usize = 15;

/// A validated discovery scoping key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ServiceType(String);

impl ServiceType {
    /// Validate `value` as a service type. Case is folded to lowercase.
    pub fn parse(value: &str) -> Result<Self, NetworkError> {
        let folded = value.to_ascii_lowercase();
        let invalid = |reason| NetworkError::InvalidServiceType {
            value: value.to_string(),
            reason,
        };

        if folded.is_empty() {
            return Err(invalid("empty"));
        }
        if folded.len() > MAX_SERVICE_TYPE_LEN {
            return Err(invalid("longer than 15 characters"));
        }
        if !folded
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(invalid("only letters, digits and '-' are allowed"));
        }
        if !folded.bytes().any(|b| b.is_ascii_lowercase()) {
            return Err(invalid("must contain at least one letter"));
        }
        if folded.starts_with('-') || folded.ends_with('-') {
            return Err(invalid("must not start or end with '-'"));
        }
        if folded.contains("--") {
            return Err(invalid("must not contain consecutive '-'"));
        }

        Ok(Self(folded))
    }

    /// Derive the key for a room id: `picto-<id>`.
    pub fn for_room(room_id: &str) -> Result<Self, NetworkError> {
        Self::parse(&format!("{SERVICE_PREFIX}-{room_id}"))
    }

    /// Return the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ServiceType {
    type Error = NetworkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ServiceType> for String {
    fn from(value: ServiceType) -> Self {
        value.0
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
