//! Stock comparators and filters over scopes.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::scope::Scope;

/// Orders two scopes for a snapshot.
pub type Comparator = Arc<dyn Fn(&Scope, &Scope) -> Ordering + Send + Sync>;

/// Keeps a scope in a snapshot when it returns `true`.
pub type Filter = Arc<dyn Fn(&Scope) -> bool + Send + Sync>;

/// Lexical order on scope id. The default everywhere.
pub fn by_id() -> Comparator {
    Arc::new(|a: &Scope, b: &Scope| a.id().cmp(b.id()))
}

/// Order by when the attribute `key` was created.
///
/// Scopes lacking the attribute sort after those that have it. Equal or
/// missing timestamps fall back to id order, so the result is total.
pub fn by_created_at(key: impl Into<String>) -> Comparator {
    let key = key.into();
    Arc::new(move |a: &Scope, b: &Scope| {
        let at = |s: &Scope| s.get_attribute(&key).map(|attr| attr.created_at());
        match (at(a), at(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
        .then_with(|| a.id().cmp(b.id()))
    })
}

/// Keep scopes whose string attribute `key` equals `id`.
///
/// A value that fails to decode does not match.
pub fn linked_to(key: impl Into<String>, id: impl Into<String>) -> Filter {
    let key = key.into();
    let id = id.into();
    Arc::new(move |scope: &Scope| {
        matches!(scope.get_str(&key), Ok(Some(ref linked)) if *linked == id)
    })
}
