//! Three-part addressing scheme for endpoint/cluster/app targets.
//!
//! Addresses serialize as `pin://endpoint_id/cluster_id/app_id`. Tokens are
//! plain URL-safe strings; no escaping is performed, so `/` never appears
//! inside a token.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Scheme prefix for serialized addresses.
pub const SCHEME: &str = "pin://";

/// Errors from address construction or parsing.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("Address is missing the '{SCHEME}' scheme: {0}")]
    MissingScheme(String),

    #[error("Address must have endpoint/cluster/app segments: {0}")]
    MissingSegments(String),

    #[error("Invalid address token '{0}': tokens must be non-empty and URL-safe")]
    InvalidToken(String),
}

/// A fully qualified `pin://` address.
///
/// Immutable once constructed; equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub endpoint_id: String,
    pub cluster_id: String,
    pub app_id: String,
}

impl Address {
    /// Build an address from its three tokens, validating each.
    pub fn new(
        endpoint_id: impl Into<String>,
        cluster_id: impl Into<String>,
        app_id: impl Into<String>,
    ) -> Result<Self, AddressError> {
        let addr = Self {
            endpoint_id: endpoint_id.into(),
            cluster_id: cluster_id.into(),
            app_id: app_id.into(),
        };
        for token in [&addr.endpoint_id, &addr.cluster_id, &addr.app_id] {
            validate_token(token)?;
        }
        Ok(addr)
    }

    /// Parse a serialized `pin://endpoint/cluster/app` string.
    pub fn parse(input: &str) -> Result<Self, AddressError> {
        let rest = input
            .strip_prefix(SCHEME)
            .ok_or_else(|| AddressError::MissingScheme(input.to_string()))?;

        let mut segments = rest.splitn(3, '/');
        let endpoint_id = segments.next().unwrap_or_default();
        let cluster_id = segments.next().unwrap_or_default();
        let app_id = segments
            .next()
            .ok_or_else(|| AddressError::MissingSegments(input.to_string()))?;

        if endpoint_id.is_empty() || cluster_id.is_empty() || app_id.is_empty() {
            return Err(AddressError::MissingSegments(input.to_string()));
        }

        Self::new(endpoint_id, cluster_id, app_id)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SCHEME}{}/{}/{}",
            self.endpoint_id, self.cluster_id, self.app_id
        )
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn validate_token(token: &str) -> Result<(), AddressError> {
    if token.is_empty() {
        return Err(AddressError::InvalidToken(token.to_string()));
    }
    let ok = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
    if !ok {
        return Err(AddressError::InvalidToken(token.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let addr = Address::new("peer", "demo", "echo").unwrap();
        let wire = addr.to_string();
        assert_eq!(wire, "pin://peer/demo/echo");
        assert_eq!(Address::parse(&wire).unwrap(), addr);
    }

    #[test]
    fn test_parse_rejects_missing_scheme() {
        let err = Address::parse("peer/demo/echo").unwrap_err();
        assert!(matches!(err, AddressError::MissingScheme(_)));
    }

    #[test]
    fn test_parse_rejects_short_paths() {
        for input in ["pin://peer", "pin://peer/demo", "pin://", "pin://peer//echo"] {
            let err = Address::parse(input).unwrap_err();
            assert!(matches!(err, AddressError::MissingSegments(_)), "{input}");
        }
    }

    #[test]
    fn test_rejects_invalid_tokens() {
        assert!(Address::new("", "demo", "echo").is_err());
        assert!(Address::new("peer", "de mo", "echo").is_err());
        assert!(Address::new("peer", "demo", "ec#ho").is_err());
        // Slash in a token would corrupt the wire form
        assert!(Address::new("peer", "demo", "ec/ho").is_err());
    }

    #[test]
    fn test_url_safe_punctuation_allowed() {
        let addr = Address::new("node-1", "my_cluster", "app.v2~beta").unwrap();
        assert_eq!(Address::parse(&addr.to_string()).unwrap(), addr);
    }
}
