//! Shapes of the attribute events delivered by the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kind::Kind;

/// The node an attribute belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

/// One attribute edge as streamed by the authority.
///
/// `val` is the JSON-encoded value. A missing `val` means "no value", which is
/// distinct from the string `"null"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeEdge {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub val: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    pub node: NodeRef,
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub vector: bool,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub immutable: bool,
}

impl AttributeEdge {
    /// A value-less edge created now.
    pub fn new(id: impl Into<String>, node_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            key: key.into(),
            val: None,
            created_at: Utc::now(),
            deleted_at: None,
            node: NodeRef {
                id: node_id.into(),
                kind: None,
            },
            index: None,
            version: 1,
            vector: false,
            private: false,
            protected: false,
            immutable: false,
        }
    }

    /// Set `val` to the JSON encoding of `value`.
    pub fn with_value(mut self, value: serde_json::Value) -> Self {
        self.val = Some(value.to_string());
        self
    }

    /// Set `val` verbatim, without checking that it is valid JSON.
    pub fn with_raw_val(mut self, val: impl Into<String>) -> Self {
        self.val = Some(val.into());
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = at;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted_at = Some(Utc::now());
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Id of the owning scope.
    pub fn scope_id(&self) -> &str {
        &self.node.id
    }
}

/// One item of a scoped-attributes subscription.
///
/// An update with no attribute and `done == true` is a plain boundary:
/// nothing changed, the synchronization pass is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeUpdate {
    #[serde(default)]
    pub attribute: Option<AttributeEdge>,
    #[serde(default)]
    pub done: bool,
}

impl AttributeUpdate {
    pub fn edge(attribute: AttributeEdge, done: bool) -> Self {
        Self {
            attribute: Some(attribute),
            done,
        }
    }

    pub fn boundary() -> Self {
        Self {
            attribute: None,
            done: true,
        }
    }
}

/// Which scopes a subscription should stream attributes for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopedAttributesFilter {
    pub kinds: Vec<Kind>,
}

impl ScopedAttributesFilter {
    pub fn kind(kind: Kind) -> Self {
        Self { kinds: vec![kind] }
    }
}
