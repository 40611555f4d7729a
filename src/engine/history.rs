//! Closed-trade history with best-effort external persistence
//!
//! The store serializes its record list through a key-value collaborator and
//! keeps concurrently open views of the same key consistent through an
//! explicit, injectable bus (no hidden module-level registry). Store
//! failures are swallowed: the in-memory session stays authoritative and
//! persistence degrades silently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use tokio::sync::broadcast;

use crate::types::{HistoryRecord, SimError};

/// External key-value persistence collaborator. Implementations are
/// best-effort; callers treat every failure as a no-op.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SimError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SimError>;
    fn remove(&self, key: &str) -> Result<(), SimError>;
}

/// In-memory store used by tests and the demo binary.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, SimError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| SimError::Storage(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SimError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| SimError::Storage(e.to_string()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SimError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| SimError::Storage(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }
}

/// Change-notification bus keyed by storage key. Constructed once per
/// process and handed to every store instance, so tests can substitute a
/// fresh bus per test.
#[derive(Debug, Clone, Default)]
pub struct HistoryBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<()>>>>,
}

impl HistoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, key: &str) -> broadcast::Receiver<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .subscribe()
    }

    pub fn notify(&self, key: &str) {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = channels.get(key) {
            // no receivers is fine
            let _ = tx.send(());
        }
    }
}

/// Append-only record of closed trades for one simulator type, capped at
/// `max_records` with ring-buffer truncation on write.
pub struct HistoryStore {
    key: String,
    kv: Arc<dyn KvStore>,
    bus: HistoryBus,
    max_records: usize,
}

impl HistoryStore {
    pub fn new(sim_type: &str, kv: Arc<dyn KvStore>, bus: HistoryBus, max_records: usize) -> Self {
        Self {
            key: format!("sim_history_{sim_type}"),
            kv,
            bus,
            max_records,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// All records, newest first. A missing or unreadable value reads as an
    /// empty list.
    pub fn list_all(&self) -> Vec<HistoryRecord> {
        match self.kv.get(&self.key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!("history list under {} is corrupt, starting over: {e}", self.key);
                Vec::new()
            }),
            Ok(None) => Vec::new(),
            Err(e) => {
                debug!("history read failed for {}: {e}", self.key);
                Vec::new()
            }
        }
    }

    /// Prepends a record, truncates to the cap, persists best-effort and
    /// notifies every other live view of this key.
    pub fn append(&self, record: HistoryRecord) {
        let mut records = self.list_all();
        records.insert(0, record);
        records.truncate(self.max_records);
        match serde_json::to_string(&records) {
            Ok(raw) => {
                if let Err(e) = self.kv.set(&self.key, &raw) {
                    debug!("history write failed for {}: {e}", self.key);
                }
            }
            Err(e) => debug!("history serialization failed for {}: {e}", self.key),
        }
        self.bus.notify(&self.key);
    }

    /// Clears the persisted list.
    pub fn reset(&self) {
        if let Err(e) = self.kv.remove(&self.key) {
            debug!("history reset failed for {}: {e}", self.key);
        }
        self.bus.notify(&self.key);
    }

    /// Change notifications for this store's key.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.bus.subscribe(&self.key)
    }
}
