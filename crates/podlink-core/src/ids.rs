//! Identifier types for cluster objects.
//!
//! Pod and namespace names follow the Kubernetes naming rules, so a value
//! that parses here is accepted by the API server as-is.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a DNS-1123 subdomain (pod names).
const MAX_SUBDOMAIN_LEN: usize = 253;

/// Maximum length of a DNS-1123 label (namespace names).
const MAX_LABEL_LEN: usize = 63;

/// The name of a pod within a namespace.
///
/// Used as the cache key for per-pod agent clients, so only equality and
/// hashing matter.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PodId(String);

impl PodId {
    /// Parse a `PodId` from a pod name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid DNS-1123 subdomain.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        validate_dns_name(s, MAX_SUBDOMAIN_LEN, true)?;
        Ok(Self(s.to_string()))
    }

    /// Return the pod name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PodId({})", self.0)
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PodId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PodId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_dns_name(&value, MAX_SUBDOMAIN_LEN, true)?;
        Ok(Self(value))
    }
}

impl From<PodId> for String {
    fn from(id: PodId) -> Self {
        id.0
    }
}

impl AsRef<str> for PodId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A Kubernetes namespace name.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// Parse a `Namespace` from a name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is not a valid DNS-1123 label.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        validate_dns_name(s, MAX_LABEL_LEN, false)?;
        Ok(Self(s.to_string()))
    }

    /// Return the namespace name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self("default".to_string())
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Namespace {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_dns_name(&value, MAX_LABEL_LEN, false)?;
        Ok(Self(value))
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

fn validate_dns_name(s: &str, max_len: usize, allow_dots: bool) -> Result<(), IdError> {
    if s.is_empty() {
        return Err(IdError::Empty);
    }
    if s.len() > max_len {
        return Err(IdError::TooLong {
            max: max_len,
            got: s.len(),
        });
    }
    let allowed = |c: char| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || (allow_dots && c == '.')
    };
    if let Some(c) = s.chars().find(|&c| !allowed(c)) {
        return Err(IdError::InvalidChar(c));
    }

    let alnum = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit();
    let starts_ok = s.chars().next().is_some_and(alnum);
    let ends_ok = s.chars().next_back().is_some_and(alnum);
    if !(starts_ok && ends_ok) {
        return Err(IdError::InvalidBoundary);
    }

    Ok(())
}

/// Errors that can occur when parsing identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// The name is empty.
    #[error("name must not be empty")]
    Empty,

    /// The name exceeds the maximum length.
    #[error("name too long: at most {max} characters, got {got}")]
    TooLong {
        /// The maximum number of characters.
        max: usize,
        /// The actual number of characters.
        got: usize,
    },

    /// The name contains a character outside the allowed set.
    #[error("invalid character {0:?}: only lowercase alphanumerics and '-' are allowed")]
    InvalidChar(char),

    /// The name starts or ends with a non-alphanumeric character.
    #[error("name must start and end with an alphanumeric character")]
    InvalidBoundary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_id_parse() {
        let id = PodId::parse("web-5f7b9c-abcde").unwrap();
        assert_eq!(id.as_str(), "web-5f7b9c-abcde");
        assert_eq!(id.to_string(), "web-5f7b9c-abcde");
        assert_eq!(format!("{id:?}"), "PodId(web-5f7b9c-abcde)");
    }

    #[test]
    fn pod_id_allows_dots() {
        assert!(PodId::parse("agent.v2-0").is_ok());
        assert!(matches!(
            Namespace::parse("team.a"),
            Err(IdError::InvalidChar('.'))
        ));
    }

    #[test]
    fn pod_id_rejects_empty() {
        assert_eq!(PodId::parse(""), Err(IdError::Empty));
    }

    #[test]
    fn pod_id_rejects_uppercase() {
        assert_eq!(PodId::parse("Web-1"), Err(IdError::InvalidChar('W')));
    }

    #[test]
    fn pod_id_rejects_bad_boundary() {
        assert_eq!(PodId::parse("-web"), Err(IdError::InvalidBoundary));
        assert_eq!(PodId::parse("web-"), Err(IdError::InvalidBoundary));
    }

    #[test]
    fn namespace_too_long() {
        let name = "a".repeat(64);
        assert!(matches!(
            Namespace::parse(&name),
            Err(IdError::TooLong { max: 63, got: 64 })
        ));
    }

    #[test]
    fn namespace_default() {
        assert_eq!(Namespace::default().as_str(), "default");
    }

    #[test]
    fn pod_id_serde_json() {
        let id = PodId::parse("db-0").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"db-0\"");
        let parsed: PodId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn pod_id_serde_rejects_invalid() {
        let result: Result<PodId, _> = serde_json::from_str("\"Not_Valid\"");
        assert!(result.is_err());
    }
}
