//! Session tokens and connecting to the authority.
//!
//! A service registers once with a service token and receives a session
//! token. [`TokenCache::retrieve`] avoids registering again by checking the
//! in-process cache, then a [`TokenStore`], before asking the authority.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::conn::{Conn, Transport};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

/// The remote authority, as far as session setup is concerned.
#[async_trait]
pub trait Authority: Send + Sync {
    /// Register a service client and return its session token.
    async fn register_service(&self, client_name: &str, service_token: &str) -> anyhow::Result<String>;

    /// Open an admin session for `token`.
    async fn session(&self, token: &str) -> anyhow::Result<Arc<dyn Transport>>;
}

/// Where session tokens persist between runs.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn load(&self, client_name: &str) -> anyhow::Result<Option<String>>;

    async fn save(&self, client_name: &str, token: &str) -> anyhow::Result<()>;
}

/// Stores each client's token in `<dir>/<client_name>.txt`.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    dir: PathBuf,
}

impl FileTokenStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store in the current working directory.
    pub fn cwd() -> Self {
        Self::new(".")
    }

    pub fn path_for(&self, client_name: &str) -> PathBuf {
        self.dir.join(format!("{client_name}.txt"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self, client_name: &str) -> anyhow::Result<Option<String>> {
        let path = self.path_for(client_name);
        match tokio::fs::read_to_string(&path).await {
            Ok(token) => {
                let token = token.trim();
                Ok((!token.is_empty()).then(|| token.to_string()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn save(&self, client_name: &str, token: &str) -> anyhow::Result<()> {
        let path = self.path_for(client_name);
        tokio::fs::write(&path, token)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }
}

/// Keeps tokens in memory only.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<String, String>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self, client_name: &str) -> anyhow::Result<Option<String>> {
        Ok(self.tokens.get(client_name).map(|t| t.value().clone()))
    }

    async fn save(&self, client_name: &str, token: &str) -> anyhow::Result<()> {
        self.tokens.insert(client_name.to_string(), token.to_string());
        Ok(())
    }
}

/// Register `client_name` with the authority and return the session token.
pub async fn get_token(
    authority: &dyn Authority,
    service_token: &str,
    client_name: &str,
) -> Result<String> {
    authority
        .register_service(client_name, service_token)
        .await
        .map_err(CacheError::Authority)
}

/// Process-wide memo of session tokens by client name.
#[derive(Debug, Default)]
pub struct TokenCache {
    tokens: DashMap<String, String>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for `client_name`: memo, then `store`, then a fresh registration.
    ///
    /// A fresh token is written back to `store`. A failing write is logged and
    /// does not fail the call, the token is still good for this process.
    pub async fn retrieve(
        &self,
        authority: &dyn Authority,
        store: &dyn TokenStore,
        service_token: &str,
        client_name: &str,
    ) -> Result<String> {
        if let Some(token) = self.tokens.get(client_name) {
            return Ok(token.value().clone());
        }

        let token = match store.load(client_name).await.map_err(CacheError::TokenStore)? {
            Some(token) => {
                debug!(client = client_name, "session token loaded from store");
                token
            }
            None => {
                debug!(client = client_name, "registering for a new session token");
                let token = get_token(authority, service_token, client_name).await?;
                if let Err(err) = store.save(client_name, &token).await {
                    warn!(client = client_name, error = %err, "failed to persist session token");
                }
                token
            }
        };

        self.tokens.insert(client_name.to_string(), token.clone());
        Ok(token)
    }

    pub fn forget(&self, client_name: &str) {
        self.tokens.remove(client_name);
    }
}

/// Open a session for `token` and mirror it through a new [`Conn`].
pub async fn connect(authority: &dyn Authority, token: &str) -> Result<Conn> {
    connect_with_config(authority, token, CacheConfig::default()).await
}

pub async fn connect_with_config(
    authority: &dyn Authority,
    token: &str,
    config: CacheConfig,
) -> Result<Conn> {
    let transport = authority
        .session(token)
        .await
        .map_err(CacheError::Authority)?;
    Conn::builder(transport).config(config).build()
}
