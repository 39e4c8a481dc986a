//! Client-local persistence of the anonymous cart token.
//!
//! Only anonymous tokens are stored: authenticated carts are found again
//! through the user's session, never through local storage.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketstall_core::CartToken;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors from identity storage.
///
/// Never fatal: the session keeps working with an unpersisted token.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("identity file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Storage for the anonymous cart token.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// The stored token, if any.
    async fn load(&self) -> Result<Option<CartToken>, PersistenceError>;

    /// Replace the stored token.
    async fn save(&self, token: &CartToken) -> Result<(), PersistenceError>;

    /// Forget the stored token.
    async fn clear(&self) -> Result<(), PersistenceError>;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedIdentity {
    anonymous_cart_id: CartToken,
    saved_at: DateTime<Utc>,
}

/// JSON file-backed identity store.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load(&self) -> Result<Option<CartToken>, PersistenceError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let persisted: PersistedIdentity = serde_json::from_slice(&bytes)?;
        debug!(
            path = %self.path.display(),
            saved_at = %persisted.saved_at,
            "Loaded anonymous cart token"
        );
        Ok(Some(persisted.anonymous_cart_id))
    }

    async fn save(&self, token: &CartToken) -> Result<(), PersistenceError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&PersistedIdentity {
            anonymous_cart_id: token.clone(),
            saved_at: Utc::now(),
        })?;

        // Write then rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory identity store for tests and ephemeral sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdentityStore {
    token: Arc<Mutex<Option<CartToken>>>,
}

impl MemoryIdentityStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `token`.
    #[must_use]
    pub fn with_token(token: CartToken) -> Self {
        Self {
            token: Arc::new(Mutex::new(Some(token))),
        }
    }

    /// The current token without going through the async interface.
    #[must_use]
    pub fn current(&self) -> Option<CartToken> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn load(&self) -> Result<Option<CartToken>, PersistenceError> {
        Ok(self.current())
    }

    async fn save(&self, token: &CartToken) -> Result<(), PersistenceError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("marketstall-{}-{name}", uuid::Uuid::new_v4()))
            .join("cart.json")
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let store = FileIdentityStore::new(temp_path("roundtrip"));
        assert_eq!(store.load().await.unwrap(), None);

        store.save(&CartToken::new("anon-1")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(CartToken::new("anon-1")));

        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(raw.contains("\"anonymousCartId\": \"anon-1\""));
        assert!(raw.contains("savedAt"));

        store.clear().await.unwrap();
        assert_eq!(store.load().await.unwrap(), None);
        // Clearing twice is fine
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let store = FileIdentityStore::new(temp_path("corrupt"));
        tokio::fs::create_dir_all(store.path().parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(store.path(), b"{not json").await.unwrap();

        assert!(matches!(
            store.load().await,
            Err(PersistenceError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryIdentityStore::with_token(CartToken::new("a"));
        assert_eq!(store.load().await.unwrap(), Some(CartToken::new("a")));
        store.clear().await.unwrap();
        assert_eq!(store.current(), None);
    }
}
