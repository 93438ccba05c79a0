//! Kubeconfig context names
//!
//! A context is `<organization>-<host alias>` and doubles as the file name
//! for cache entries and tunnel records, so it is restricted to a
//! filesystem-safe character set.

use crate::error::{KubehopError, KubehopResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Validated context name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Context(String);

impl Context {
    /// Build the context for a host of an organization
    pub fn for_host(organization: &str, host: &str) -> KubehopResult<Self> {
        Self::parse(&format!("{}-{}", organization, host))
    }

    /// Validate an existing context name
    pub fn parse(name: &str) -> KubehopResult<Self> {
        let valid = !name.is_empty()
            && name.len() <= 253
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(KubehopError::InvalidContext(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name stem for per-context state
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Context {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Context {
    type Error = KubehopError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Context> for String {
    fn from(value: Context) -> Self {
        value.0
    }
}

impl std::str::FromStr for Context {
    type Err = KubehopError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
