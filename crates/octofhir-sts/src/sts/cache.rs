//! In-memory cache of issued STS tokens.
//!
//! Tokens are keyed on everything that changes the issued assertion: patient,
//! practitioner, workflow and token type. Entries expire a fixed TTL after
//! insertion and are dropped on the next insert or on a lookup of their key.
//! Concurrent misses for the same key may each reach the STS; the last one to
//! finish wins. A request that is cancelled before the STS answers caches
//! nothing.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use octofhir_sts::sts::{CachedTokenService, StsTokenService, TokenCache};
//!
//! let inner = StsTokenService::from_config(&config, suite)?;
//! let service = CachedTokenService::new(inner, Arc::new(TokenCache::new(Duration::from_secs(300))));
//! let token = service.request_access_token(&context, TokenType::Hcp).await?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::service::AccessTokenService;
use crate::StsResult;
use crate::types::{LaunchContext, TokenType};

// =============================================================================
// Cache Key
// =============================================================================

/// Hex SHA-256 over the launch identity and token type.
///
/// The key never holds the BSN in clear text, so it is safe to log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derives the key for `context` under `token_type`.
    #[must_use]
    pub fn new(context: &LaunchContext, token_type: TokenType) -> Self {
        let mut hasher = Sha256::new();
        for part in [
            context.bsn.as_str(),
            context.practitioner.identifier.system.as_str(),
            context.practitioner.identifier.value.as_str(),
            context.workflow_id.as_str(),
            token_type.as_str(),
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// The full hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Token Cache
// =============================================================================

/// A cached token with its expiry.
#[derive(Debug, Clone)]
pub struct CachedToken {
    /// The access token.
    pub token: String,
    /// When the entry stops being served.
    pub expires_at: Instant,
}

impl CachedToken {
    /// Returns `true` once the entry has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// TTL-bounded map from [`CacheKey`] to token.
#[derive(Debug)]
pub struct TokenCache {
    entries: RwLock<HashMap<CacheKey, CachedToken>>,
    ttl: Duration,
}

impl TokenCache {
    /// Creates an empty cache whose entries live for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// The entry lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the token for `key` if present and not expired.
    ///
    /// An expired entry for `key` is removed.
    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => return Some(entry.token.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(CachedToken::is_expired) {
            entries.remove(key);
        }
        None
    }

    /// Stores `token` under `key`, replacing any previous entry.
    ///
    /// Expired entries are dropped first.
    pub async fn insert(&self, key: CacheKey, token: String) {
        let entry = CachedToken {
            token,
            expires_at: Instant::now() + self.ttl,
        };
        let mut entries = self.entries.write().await;
        entries.retain(|_, existing| !existing.is_expired());
        entries.insert(key, entry);
    }

    /// Removes the entry for `key`. Returns `true` if one was present.
    pub async fn evict(&self, key: &CacheKey) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Removes all expired entries and returns how many were dropped.
    pub async fn cleanup(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before - entries.len();
        if removed > 0 {
            tracing::info!(removed, "Removed expired STS tokens from cache");
        }
        removed
    }

    /// Removes every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of entries, including expired ones not yet dropped.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

// =============================================================================
// Cached Service
// =============================================================================

/// Serves tokens from a [`TokenCache`] and falls back to an inner service.
///
/// Only successful results are cached.
pub struct CachedTokenService<S> {
    inner: S,
    cache: Arc<TokenCache>,
}

impl<S: AccessTokenService> CachedTokenService<S> {
    /// Wraps `inner` with `cache`.
    #[must_use]
    pub fn new(inner: S, cache: Arc<TokenCache>) -> Self {
        Self { inner, cache }
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<TokenCache> {
        &self.cache
    }
}

#[async_trait]
impl<S: AccessTokenService> AccessTokenService for CachedTokenService<S> {
    async fn request_access_token(
        &self,
        context: &LaunchContext,
        token_type: TokenType,
    ) -> StsResult<String> {
        let key = CacheKey::new(context, token_type);
        if let Some(token) = self.cache.get(&key).await {
            tracing::trace!(key = key.short(), "STS token cache hit");
            return Ok(token);
        }

        tracing::trace!(key = key.short(), "STS token cache miss");
        let token = self.inner.request_access_token(context, token_type).await?;
        tracing::info!(key = key.short(), token_type = %token_type, "Caching STS token");
        self.cache.insert(key, token.clone()).await;
        Ok(token)
    }
}

impl<S> fmt::Debug for CachedTokenService<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedTokenService")
            .field("ttl", &self.cache.ttl())
            .finish_non_exhaustive()
    }
}
