//! Persisted pending-job set used for crash/reload recovery.
//!
//! Each board keeps two keys in a key-value backend:
//! `pending_<board>` holding `{"ids": [...]}` and `timestamp_<board>` holding
//! epoch millis. Entries older than the TTL are dropped on load without any
//! other side effect. Writes are last-writer-wins; one driver per board is
//! assumed.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::Result;

/// Pending entries older than this are treated as abandoned.
pub const PENDING_TTL: Duration = Duration::from_secs(10 * 60);

pub fn pending_key(board_id: &str) -> String {
    format!("pending_{board_id}")
}

pub fn timestamp_key(board_id: &str) -> String {
    format!("timestamp_{board_id}")
}

#[async_trait]
pub trait KeyValue: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: String) -> Result<()>;
    async fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryKv {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().expect("MemoryKv poisoned").clone()
    }
}

#[async_trait]
impl KeyValue for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().expect("MemoryKv poisoned").get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries
            .lock()
            .expect("MemoryKv poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().expect("MemoryKv poisoned").remove(key);
        Ok(())
    }
}

/// Flat JSON object on disk, one string value per key.
#[derive(Debug)]
pub struct FileKv {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl FileKv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => match serde_json::from_str(&content) {
                Ok(map) => Ok(map),
                Err(e) => {
                    warn!(path = %self.path.display(), err = %e, "store: unreadable file, starting empty");
                    Ok(BTreeMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(map)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValue for FileKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        map.insert(key.to_string(), value);
        self.write_all(&map).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        if map.remove(key).is_some() {
            self.write_all(&map).await?;
        }
        Ok(())
    }
}

/// Ids restored from the store together with their age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSet {
    pub ids: Vec<String>,
    pub saved_at_ms: i64,
}

#[async_trait]
pub trait PendingJobStore: Send + Sync {
    /// Returns the board's pending ids if present and younger than the TTL.
    /// Stale or malformed entries are cleared and reported as `None`.
    async fn load(&self, board_id: &str) -> Result<Option<PendingSet>>;
    async fn save(&self, board_id: &str, ids: &[String]) -> Result<()>;
    async fn clear(&self, board_id: &str) -> Result<()>;
}

#[derive(Serialize, Deserialize)]
struct PendingPayload {
    ids: Vec<String>,
}

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

pub struct JobStore<K: KeyValue> {
    kv: K,
    ttl: Duration,
    clock: Clock,
}

impl<K: KeyValue> JobStore<K> {
    pub fn new(kv: K) -> Self {
        Self {
            kv,
            ttl: PENDING_TTL,
            clock: Arc::new(|| Utc::now().timestamp_millis()),
        }
    }

    pub fn with_ttl(self, ttl: Duration) -> Self {
        Self { ttl, ..self }
    }

    /// Replaces the wall clock (epoch millis).
    pub fn with_clock(self, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            ..self
        }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    async fn read_entry(&self, board_id: &str) -> Result<Option<(Vec<String>, Option<i64>)>> {
        let Some(raw_ids) = self.kv.get(&pending_key(board_id)).await? else {
            return Ok(None);
        };
        let ids = match serde_json::from_str::<PendingPayload>(&raw_ids) {
            Ok(payload) => payload.ids,
            Err(e) => {
                warn!(board = board_id, err = %e, "store: malformed pending entry");
                Vec::new()
            }
        };
        let timestamp = self
            .kv
            .get(&timestamp_key(board_id))
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok());
        Ok(Some((ids, timestamp)))
    }
}

impl JobStore<FileKv> {
    /// File-backed store under the user's data directory.
    pub fn open_default() -> Self {
        Self::new(FileKv::new(default_store_path()))
    }
}

pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("tubescope")
        .join("pending.json")
}

#[async_trait]
impl<K: KeyValue> PendingJobStore for JobStore<K> {
    async fn load(&self, board_id: &str) -> Result<Option<PendingSet>> {
        let Some((ids, timestamp)) = self.read_entry(board_id).await? else {
            return Ok(None);
        };

        let now = (self.clock)();
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        // A timestamp from the future is as untrustworthy as a stale one.
        let fresh =
            timestamp.is_some_and(|saved| (0..ttl_ms).contains(&now.saturating_sub(saved)));

        if !fresh || ids.is_empty() {
            debug!(board = board_id, ?timestamp, "store: dropping stale pending entry");
            self.clear(board_id).await?;
            return Ok(None);
        }

        Ok(timestamp.map(|saved_at_ms| PendingSet { ids, saved_at_ms }))
    }

    async fn save(&self, board_id: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return self.clear(board_id).await;
        }
        let payload = serde_json::to_string(&PendingPayload { ids: ids.to_vec() })?;
        self.kv.set(&pending_key(board_id), payload).await?;
        self.kv
            .set(&timestamp_key(board_id), (self.clock)().to_string())
            .await
    }

    async fn clear(&self, board_id: &str) -> Result<()> {
        self.kv.remove(&pending_key(board_id)).await?;
        self.kv.remove(&timestamp_key(board_id)).await
    }
}
