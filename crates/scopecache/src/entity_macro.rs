//! Macro for declaring typed scope handles.

/// Declare a typed handle over a [`Scope`](crate::Scope) of one [`Kind`](crate::Kind).
///
/// The handle derefs to the scope, so every read (`id()`, `get()`,
/// `attributes()`, ...) is available directly. Relationship accessors are
/// added with a regular `impl` block.
///
/// # Example
///
/// ```ignore
/// use scopecache_core::{define_entity, Kind};
///
/// define_entity! {
///     /// A lobby waiting for players.
///     Lobby => Kind::Batch
/// }
/// ```
#[macro_export]
macro_rules! define_entity {
    ($(#[$meta:meta])* $name:ident => $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name(::std::sync::Arc<$crate::Scope>);

        impl $crate::Entity for $name {
            const KIND: $crate::Kind = $kind;

            fn from_scope(scope: ::std::sync::Arc<$crate::Scope>) -> Self {
                Self(scope)
            }

            fn scope(&self) -> &::std::sync::Arc<$crate::Scope> {
                &self.0
            }
        }

        impl ::std::ops::Deref for $name {
            type Target = $crate::Scope;

            fn deref(&self) -> &$crate::Scope {
                &self.0
            }
        }

        impl ::std::cmp::PartialEq for $name {
            fn eq(&self, other: &Self) -> bool {
                ::std::sync::Arc::ptr_eq(&self.0, &other.0)
            }
        }

        impl ::std::cmp::Eq for $name {}

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.0.id()).finish()
            }
        }
    };
}
