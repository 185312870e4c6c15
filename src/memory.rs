//! An in-memory [`Backend`] with the same observable semantics as a single
//! redis database: seconds-precision TTLs, prefix scans in stable order and
//! optimistic watch/exec pipelines. Unit tests run against this backend so
//! they need no server.

use crate::backend::{Backend, Batch, BatchOp};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// The shared database behind every [`MemoryBackend`] handle.
#[derive(Debug, Default)]
struct Store {
    entries: BTreeMap<String, Entry>,
    // Modification counters drive watch invalidation. Counters survive
    // deletion so that delete and re-create cannot be confused with an
    // untouched key.
    versions: HashMap<String, u64>,
    clock: u64,
}

impl Store {
    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_string(), self.clock);
    }

    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    /// Drops every key whose TTL has passed. Expiry counts as a
    /// modification, the same way an expiring key invalidates a watch on a
    /// real server.
    fn evict_expired(&mut self) {
        let now = Instant::now();
        let dead: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at.map_or(false, |at| at <= now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in dead {
            self.entries.remove(&key);
            self.touch(&key);
        }
    }

    fn apply(&mut self, batch: Batch) {
        for op in batch.ops {
            match op {
                BatchOp::Set { key, value, expire } => {
                    let expires_at = expire.map(|seconds| Instant::now() + Duration::from_secs(seconds));
                    self.entries.insert(key.clone(), Entry { value, expires_at });
                    self.touch(&key);
                }
                BatchOp::Del { key } => {
                    if self.entries.remove(&key).is_some() {
                        self.touch(&key);
                    }
                }
                BatchOp::Expire { key, seconds } => {
                    if let Some(entry) = self.entries.get_mut(&key) {
                        entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                        self.touch(&key);
                    }
                }
            }
        }
    }
}

/// A connection-like handle onto an in-memory database.
///
/// Handles created through [`handle`](MemoryBackend::handle) share the same
/// store but carry their own watch set, mirroring per-connection watch state
/// on a real server.
#[derive(Debug)]
pub struct MemoryBackend {
    store: Arc<Mutex<Store>>,
    watched: Vec<(String, u64)>,
}

impl MemoryBackend {
    /// Creates a handle onto a fresh, empty database.
    pub fn new() -> Self {
        Self {
            store: Arc::new(Mutex::new(Store::default())),
            watched: Vec::new(),
        }
    }

    /// Returns a new handle sharing this handle's database.
    pub fn handle(&self) -> Self {
        Self {
            store: self.store.clone(),
            watched: Vec::new(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for MemoryBackend {
    fn get(&mut self, key: &str) -> Result<Option<String>> {
        let mut store = self.store.lock();
        store.evict_expired();
        Ok(store.entries.get(key).map(|entry| entry.value.clone()))
    }

    fn set(&mut self, key: &str, value: &str, expire: Option<u64>) -> Result<()> {
        let mut batch = Batch::new();
        batch.set(key, value, expire);
        self.store.lock().apply(batch);
        Ok(())
    }

    fn del(&mut self, key: &str) -> Result<()> {
        let mut batch = Batch::new();
        batch.del(key);
        self.store.lock().apply(batch);
        Ok(())
    }

    fn exists(&mut self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn expire(&mut self, key: &str, seconds: u64) -> Result<bool> {
        let mut store = self.store.lock();
        store.evict_expired();
        let found = store.entries.contains_key(key);
        if found {
            let mut batch = Batch::new();
            batch.expire(key, seconds);
            store.apply(batch);
        }
        Ok(found)
    }

    fn ttl(&mut self, key: &str) -> Result<i64> {
        let mut store = self.store.lock();
        store.evict_expired();
        match store.entries.get(key) {
            None => Ok(-2),
            Some(Entry {
                expires_at: None, ..
            }) => Ok(-1),
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(Instant::now());
                Ok(remaining.as_secs_f64().ceil() as i64)
            }
        }
    }

    fn keys_matching(&mut self, pattern: &str) -> Result<Vec<String>> {
        let mut store = self.store.lock();
        store.evict_expired();
        let keys = match pattern.strip_suffix('*') {
            Some(prefix) => store
                .entries
                .range(prefix.to_string()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, _)| key.clone())
                .collect(),
            None => store
                .entries
                .contains_key(pattern)
                .then(|| vec![pattern.to_string()])
                .unwrap_or_default(),
        };
        Ok(keys)
    }

    fn watch(&mut self, keys: &[String]) -> Result<()> {
        let mut store = self.store.lock();
        store.evict_expired();
        for key in keys {
            self.watched.push((key.clone(), store.version(key)));
        }
        Ok(())
    }

    fn exec(&mut self, batch: Batch) -> Result<bool> {
        let mut store = self.store.lock();
        store.evict_expired();
        let watched = std::mem::take(&mut self.watched);
        for (key, version) in &watched {
            if store.version(key) != *version {
                return Ok(false);
            }
        }
        store.apply(batch);
        Ok(true)
    }

    fn unwatch(&mut self) -> Result<()> {
        self.watched.clear();
        Ok(())
    }

    fn flush_db(&mut self) -> Result<()> {
        let mut store = self.store.lock();
        let keys: Vec<String> = store.entries.keys().cloned().collect();
        for key in keys {
            store.entries.remove(&key);
            store.touch(&key);
        }
        Ok(())
    }
}
