//!
//! pulse client-local storage
//! --------------------------
//! A small key/value persistence layer standing in for the browser's local
//! storage: the session store keeps its credential pair and identity snapshot
//! here, and auto-save keeps per-form drafts here.
//!
//! Two implementations are provided: `MemoryStore` (process lifetime, used by
//! tests and embedders that manage persistence themselves) and `FileStore`
//! (a JSON document on disk, used by the CLI so a login survives between runs).
//! Callers hold a `SharedStore` (`Arc<dyn KeyValueStore>`).

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::AppResult;

mod file;

pub use file::FileStore;

/// Well-known keys written by the session store.
pub mod keys {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    /// Serialized identity snapshot for quick access without a round trip.
    pub const USER: &str = "user";
    pub const REMEMBER_ME: &str = "auth_remember";

    /// Every key owned by the session; logout removes exactly these.
    pub const SESSION_KEYS: &[&str] = &[ACCESS_TOKEN, REFRESH_TOKEN, USER, REMEMBER_ME];

    /// Prefix for auto-save drafts so they never collide with session keys.
    pub const AUTOSAVE_PREFIX: &str = "autosave:";
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> AppResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> AppResult<()>;
    fn remove(&self, key: &str) -> AppResult<()>;
    fn keys(&self) -> AppResult<Vec<String>>;

    /// Remove several keys; stops at the first failure.
    fn remove_all(&self, keys: &[&str]) -> AppResult<()> {
        for k in keys {
            self.remove(k)?;
        }
        Ok(())
    }
}

pub type SharedStore = Arc<dyn KeyValueStore>;

#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn shared() -> SharedStore { Arc::new(Self::new()) }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        self.map.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        self.map.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> AppResult<Vec<String>> {
        Ok(self.map.read().keys().cloned().collect())
    }
}
