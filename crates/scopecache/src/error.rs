//! Error types for the scope cache.

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Errors surfaced synchronously to the caller of a cache operation.
///
/// Stream faults never appear here: a broken upstream simply stops delivering
/// done-boundaries and the cache stays frozen at its last consistent state.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The operation needs a live connection and there is none.
    ///
    /// Raised for relationship traversal and attribute subscriptions on scopes
    /// whose [`Conn`](crate::Conn) has been dropped, or that belong to a
    /// detached collection.
    #[error("operation requires an established connection")]
    NotConnected,

    /// A stored attribute value is not valid JSON.
    #[error("attribute {attribute_id} ({key}) holds a malformed value")]
    Decode {
        attribute_id: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Subscribing to a key the scope does not currently hold.
    #[error("scope {scope_id} has no live attribute {key:?}")]
    UnknownAttribute { scope_id: String, key: String },

    /// A connection was built outside of a tokio runtime.
    #[error("a tokio runtime is required to drive scope subscriptions")]
    NoRuntime,

    /// The authority rejected or failed a session request.
    #[error("authority request failed: {0:#}")]
    Authority(anyhow::Error),

    /// Reading or writing a persisted token failed.
    #[error("token store failed: {0:#}")]
    TokenStore(anyhow::Error),
}

impl CacheError {
    /// Whether this is a usage error (caller misuse rather than bad data).
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            CacheError::NotConnected | CacheError::NoRuntime | CacheError::UnknownAttribute { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_classification() {
        assert!(CacheError::NotConnected.is_usage());
        assert!(CacheError::NoRuntime.is_usage());

        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let decode = CacheError::Decode {
            attribute_id: "a1".into(),
            key: "score".into(),
            source,
        };
        assert!(!decode.is_usage());
        assert_eq!(
            decode.to_string(),
            "attribute a1 (score) holds a malformed value"
        );
    }
}
