//! Time-bounded key/value cache persisted to a JSON file.
//!
//! The cache only serves read models of the challenge API. It is never a
//! correctness dependency: persistence failures are logged and swallowed, and a
//! corrupt file on startup yields an empty store.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

pub const DEFAULT_TTL_SECONDS: f64 = 30.0;
pub const DEFAULT_CACHE_FILE: &str = "data/webhook_cache.json";

/// Key under which the list of challenges is cached.
pub const CHALLENGES_LIST_KEY: &str = "challenges:list";

pub fn challenge_detail_key(challenge_id: &str) -> String {
    format!("challenge:detail:{}", challenge_id)
}

pub fn submissions_key(challenge_id: &str) -> String {
    format!("submissions:{}", challenge_id)
}

/// Seconds since the epoch, as a float.
pub type Clock = Arc<dyn Fn() -> f64 + Send + Sync>;

fn system_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    updated_at: f64,
    value: Value,
}

pub struct InvalidationCache {
    path: PathBuf,
    ttl_seconds: f64,
    clock: Clock,
    /// Guards both the map and the file write, so the file always reflects a
    /// consistent snapshot.
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl InvalidationCache {
    /// Open the cache at `path`, creating the parent directory and an empty
    /// file if needed.
    pub fn open(path: impl Into<PathBuf>, ttl_seconds: f64) -> Self {
        Self::with_clock(path, ttl_seconds, Arc::new(system_clock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, ttl_seconds: f64, clock: Clock) -> Self {
        let path = path.into();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(e) = fs::create_dir_all(parent) {
                error!(
                    "Failed to create cache directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }

        let entries = if path.exists() {
            load_entries(&path)
        } else {
            let empty = HashMap::new();
            if let Err(e) = write_entries(&path, &empty) {
                error!("Failed to initialise cache file {}: {}", path.display(), e);
            }
            empty
        };

        info!(
            "Cache at {} loaded with {} entries (ttl {}s)",
            path.display(),
            entries.len(),
            ttl_seconds
        );

        Self {
            path,
            ttl_seconds,
            clock,
            entries: Mutex::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Value stored under `key`, unless it is absent or older than the TTL.
    ///
    /// Expired entries stay in the map and on disk until overwritten or cleared.
    pub fn get(&self, key: &str) -> Option<Value> {
        let entries = self.lock();
        let entry = entries.get(key)?;
        if (self.clock)() - entry.updated_at > self.ttl_seconds {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut entries = self.lock();
        entries.insert(
            key.to_string(),
            CacheEntry {
                updated_at: (self.clock)(),
                value,
            },
        );
        self.persist(&entries);
    }

    pub fn clear(&self, key: &str) {
        let mut entries = self.lock();
        if entries.remove(key).is_some() {
            self.persist(&entries);
        }
    }

    /// Typed read; an entry that no longer deserializes as `T` is treated as a miss.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Ignoring cache entry {} with unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub fn set_as<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v),
            Err(e) => error!("Failed to serialize cache entry {}: {}", key, e),
        }
    }

    fn persist(&self, entries: &HashMap<String, CacheEntry>) {
        if let Err(e) = write_entries(&self.path, entries) {
            error!("Failed to persist cache to {}: {}", self.path.display(), e);
        }
    }
}

fn load_entries(path: &Path) -> HashMap<String, CacheEntry> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Failed to read cache file {}: {}", path.display(), e);
            return HashMap::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                "Cache file {} is corrupt, starting empty: {}",
                path.display(),
                e
            );
            HashMap::new()
        }
    }
}

/// Write to `<path>.tmp`, then rename over `path`.
fn write_entries(path: &Path, entries: &HashMap<String, CacheEntry>) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let serialized = serde_json::to_vec_pretty(entries).map_err(io::Error::other)?;
    fs::write(&tmp, serialized)?;
    fs::rename(&tmp, path)
}
