//! Write-lock leases over the remote store.
//!
//! The protocol is acquire-with-expiry plus owner-verified release: each
//! acquisition mints a random 128-bit owner, and release is a compare-
//! and-delete on that owner, so a holder that overran its expiry cannot
//! free a lock someone else has since taken. Expiry is the recovery path
//! when a holder dies; the lock TTL must exceed the slowest handler by a
//! comfortable margin.

use crate::remote::RemoteStore;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// One held lock.
#[derive(Debug, Clone)]
pub struct LockToken {
    /// The literal lock key (may be a wildcard pattern string).
    pub key: String,
    /// Random owner minted for this acquisition.
    pub owner: u128,
    pub acquired_at: Instant,
    pub expires_at: Instant,
}

/// Mints a fresh lock owner id.
pub(crate) fn mint_owner() -> u128 {
    Uuid::new_v4().as_u128()
}

/// A set of locks held for one write, released together.
///
/// Prefer [`release`](WriteLock::release) on every exit path; dropping an
/// unreleased lease spawns a best-effort release and otherwise leaves
/// recovery to expiry.
pub struct WriteLock {
    store: Arc<dyn RemoteStore>,
    tokens: Vec<LockToken>,
    released: bool,
}

impl WriteLock {
    pub(crate) fn new(store: Arc<dyn RemoteStore>, tokens: Vec<LockToken>) -> Self {
        Self {
            store,
            tokens,
            released: false,
        }
    }

    /// Keys currently held by this lease.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|token| token.key.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Releases every held lock, verifying ownership per key. Release
    /// failures are logged and left to expiry.
    pub async fn release(mut self) {
        let tokens = std::mem::take(&mut self.tokens);
        self.released = true;
        release_tokens(&self.store, tokens).await;
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if self.released || self.tokens.is_empty() {
            return;
        }
        let tokens = std::mem::take(&mut self.tokens);
        let store = Arc::clone(&self.store);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                release_tokens(&store, tokens).await;
            });
        } else {
            tracing::warn!(
                locks = tokens.len(),
                "write lock dropped outside a runtime; relying on expiry"
            );
        }
    }
}

async fn release_tokens(store: &Arc<dyn RemoteStore>, tokens: Vec<LockToken>) {
    for token in tokens {
        match store.lock_release(&token.key, token.owner).await {
            Ok(true) => {
                tracing::trace!(key = %token.key, "lock released");
            }
            Ok(false) => {
                // Expired and possibly re-acquired by someone else;
                // the compare-and-delete kept us from stealing it.
                tracing::warn!(key = %token.key, "lock release was a no-op; owner no longer matches");
            }
            Err(error) => {
                tracing::error!(key = %token.key, %error, "lock release failed; relying on expiry");
            }
        }
    }
}
