use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::KeyValueStore;
use crate::error::{AppError, AppResult};

/// Key/value store persisted as one JSON object on disk.
///
/// The whole map is cached in memory and rewritten on every mutation through a
/// sibling temp file followed by a rename, so a crash never leaves a torn file.
pub struct FileStore {
    path: PathBuf,
    map: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    /// Open (or lazily create) the store at `path`. A corrupt file is logged and
    /// treated as empty rather than failing startup.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let map = if path.exists() {
            let text = fs::read_to_string(&path)?;
            match serde_json::from_str::<BTreeMap<String, String>>(&text) {
                Ok(m) => m,
                Err(e) => {
                    warn!(target: "pulse::storage", "ignoring unreadable state file {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        debug!(target: "pulse::storage", "opened {} with {} keys", path.display(), map.len());
        Ok(Self { path, map: RwLock::new(map) })
    }

    /// Conventional location inside a state directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> AppResult<Self> {
        Self::open(dir.as_ref().join("local_storage.json"))
    }

    pub fn path(&self) -> &Path { &self.path }

    fn persist(&self, map: &BTreeMap<String, String>) -> AppResult<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let body = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path).map_err(|e| {
            AppError::storage("state_write_failed", format!("{}: {}", self.path.display(), e))
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> AppResult<()> {
        let mut m = self.map.write();
        let mut next = m.clone();
        next.insert(key.to_string(), value.to_string());
        self.persist(&next)?;
        *m = next;
        Ok(())
    }

    fn remove(&self, key: &str) -> AppResult<()> {
        let mut m = self.map.write();
        if !m.contains_key(key) {
            return Ok(());
        }
        let mut next = m.clone();
        next.remove(key);
        self.persist(&next)?;
        *m = next;
        Ok(())
    }

    fn keys(&self) -> AppResult<Vec<String>> {
        Ok(self.map.read().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn values_survive_reopen() {
        let tmp = tempdir().unwrap();
        {
            let s = FileStore::in_dir(tmp.path().join("state")).unwrap();
            s.set("access_token", "tok-1").unwrap();
            s.set("user", r#"{"id":"1"}"#).unwrap();
            s.remove("user").unwrap();
        }
        let s = FileStore::in_dir(tmp.path().join("state")).unwrap();
        assert_eq!(s.get("access_token").unwrap().as_deref(), Some("tok-1"));
        assert_eq!(s.get("user").unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let tmp = tempdir().unwrap();
        let p = tmp.path().join("local_storage.json");
        std::fs::write(&p, "not json").unwrap();
        let s = FileStore::open(&p).unwrap();
        assert!(s.keys().unwrap().is_empty());
        s.set("k", "v").unwrap();
        assert_eq!(FileStore::open(&p).unwrap().get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn failed_write_leaves_memory_unchanged() {
        let tmp = tempdir().unwrap();
        let p = tmp.path().join("state.json");
        let s = FileStore::open(&p).unwrap();
        s.set("access_token", "tok-1").unwrap();

        // a non-empty directory in place of the file makes the rename fail
        std::fs::remove_file(&p).unwrap();
        std::fs::create_dir(&p).unwrap();
        std::fs::write(p.join("blocker"), "x").unwrap();

        assert!(s.set("refresh_token", "r-1").is_err());
        assert_eq!(s.get("refresh_token").unwrap(), None);
        assert!(s.remove("access_token").is_err());
        assert_eq!(s.get("access_token").unwrap().as_deref(), Some("tok-1"));
    }
}
