//! Periodic draft persistence for long forms.
//!
//! Each form owns one storage key (`autosave:<form>`) holding
//! `{"data": ..., "timestamp": "<rfc3339>"}`. A write only happens when the
//! serialized data differs from the last write and is not `null`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::storage::{keys, SharedStore};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(crate::config::DEFAULT_AUTOSAVE_SECS);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draft<T> {
    pub data: T,
    pub timestamp: DateTime<Utc>,
}

pub struct AutoSave {
    key: String,
    storage: SharedStore,
    interval: Duration,
    last_written: Mutex<String>,
}

impl AutoSave {
    pub fn new(storage: SharedStore, form: &str) -> Self {
        Self {
            key: format!("{}{}", keys::AUTOSAVE_PREFIX, form),
            storage,
            interval: DEFAULT_INTERVAL,
            last_written: Mutex::new(String::new()),
        }
    }

    /// Ticker interval taken from `PULSE_AUTOSAVE_SECS`.
    pub fn from_config(cfg: &Config, storage: SharedStore, form: &str) -> Self {
        Self::new(storage, form).with_interval(cfg.autosave_interval)
    }

    pub fn with_interval(mut self, every: Duration) -> Self {
        self.interval = every;
        self
    }

    pub fn key(&self) -> &str { &self.key }

    pub fn interval(&self) -> Duration { self.interval }

    /// The saved draft, if any. An unreadable draft is logged and treated as absent.
    pub fn load<T: DeserializeOwned>(&self) -> Option<Draft<T>> {
        let raw = match self.storage.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(target: "pulse::autosave", "failed to read draft {}: {}", self.key, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(target: "pulse::autosave", "discarding unreadable draft {}: {}", self.key, e);
                None
            }
        }
    }

    /// Returns whether a write happened.
    pub fn save_if_changed<T: Serialize + ?Sized>(&self, data: &T) -> AppResult<bool> {
        self.save_value(serde_json::to_value(data)?)
    }

    fn save_value(&self, data: Value) -> AppResult<bool> {
        if data.is_null() {
            return Ok(false);
        }
        let serialized = data.to_string();
        let mut last = self.last_written.lock();
        if *last == serialized {
            return Ok(false);
        }
        let draft = Draft { data, timestamp: Utc::now() };
        self.storage.set(&self.key, &serde_json::to_string(&draft)?)?;
        debug!(target: "pulse::autosave", "saved draft {} ({} bytes)", self.key, serialized.len());
        *last = serialized;
        Ok(true)
    }

    pub fn clear(&self) -> AppResult<()> {
        self.storage.remove(&self.key)?;
        self.last_written.lock().clear();
        Ok(())
    }

    /// Save `source` on every interval tick until stopped; a final save runs
    /// when the handle is stopped or dropped, or when the source's sender goes away.
    pub fn spawn<T>(self: Arc<Self>, mut source: watch::Receiver<T>) -> AutoSaveHandle
    where
        T: Serialize + Send + Sync + 'static,
    {
        let every = self.interval;
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            let snapshot = |src: &watch::Receiver<T>| serde_json::to_value(&*src.borrow());
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        if let Err(e) = snapshot(&source).map_err(AppError::from).and_then(|v| self.save_value(v)) {
                            warn!(target: "pulse::autosave", "periodic save of {} failed: {}", self.key, e);
                        }
                    }
                    changed = source.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            if let Err(e) = snapshot(&source).map_err(AppError::from).and_then(|v| self.save_value(v)) {
                warn!(target: "pulse::autosave", "final save of {} failed: {}", self.key, e);
            }
        });
        AutoSaveHandle { stop: Some(stop_tx), task }
    }
}

/// Running auto-save loop. Dropping it also stops the loop after a final save.
pub struct AutoSaveHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl AutoSaveHandle {
    /// Stop and wait for the final save.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!(target: "pulse::autosave", "auto-save task ended abnormally: {}", e);
        }
    }
}
