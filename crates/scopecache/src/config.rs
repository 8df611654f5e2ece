//! Cache configuration.

use serde::{Deserialize, Serialize};

/// Key prefixes used for relationship linkage between scopes.
///
/// These are plumbing written by the authority, not experiment data.
pub const DEFAULT_HIDDEN_KEY_PREFIXES: &[&str] =
    &["ran-", "playerGameID", "playerRoundID", "playerStageID"];

/// Settings shared by every collection of a [`Conn`](crate::Conn).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Attribute keys starting with any of these are left out of
    /// [`Scope::attributes`](crate::Scope::attributes).
    pub hidden_key_prefixes: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            hidden_key_prefixes: DEFAULT_HIDDEN_KEY_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl CacheConfig {
    /// Whether `key` is internal linkage that generic enumeration hides.
    pub fn is_hidden(&self, key: &str) -> bool {
        self.hidden_key_prefixes
            .iter()
            .any(|prefix| key.starts_with(prefix.as_str()))
    }
}
