//! Continuation store: the single conversational step each participant's
//! next message resumes.
//!
//! Backends only need two atomic operations (put, take). [`ContinuationStore`]
//! adds the routing rules on top: unreachable paths are never scheduled, and
//! records older than the optional TTL are dropped on read.

use crate::bot::routes::RouteTable;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A pending step for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Continuation {
    pub path: String,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("continuation store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("continuation store data: {0}")]
    Data(#[from] serde_json::Error),
    #[cfg(feature = "redis")]
    #[error("continuation store redis: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Durable participant -> continuation map. `take` must read and delete in one
/// atomic step so concurrent deliveries consume a record at most once.
#[async_trait]
pub trait ContinuationBackend: Send + Sync {
    async fn put(&self, participant: &str, continuation: Continuation) -> Result<(), StoreError>;
    async fn take(&self, participant: &str) -> Result<Option<Continuation>, StoreError>;
}

/// Routing-aware front of a backend.
#[derive(Clone)]
pub struct ContinuationStore {
    backend: Arc<dyn ContinuationBackend>,
    routes: Arc<RouteTable>,
    ttl: Option<Duration>,
}

impl ContinuationStore {
    pub fn new(backend: Arc<dyn ContinuationBackend>, routes: Arc<RouteTable>) -> Self {
        Self {
            backend,
            routes,
            ttl: None,
        }
    }

    /// Drop records older than `ttl` instead of resuming them.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    /// Schedule `path` for the participant's next message. No-op if `path`
    /// does not resolve in the route table.
    pub async fn set(&self, participant: &str, path: &str) -> Result<(), StoreError> {
        if !self.routes.contains(path) {
            log::debug!("continuation: not scheduling unroutable path {} for {}", path, participant);
            return Ok(());
        }
        let continuation = Continuation {
            path: path.to_string(),
            scheduled_at: Utc::now(),
        };
        self.backend.put(participant, continuation).await
    }

    /// Return and remove the pending path, if any (expired records count as none).
    pub async fn take(&self, participant: &str) -> Result<Option<String>, StoreError> {
        let Some(continuation) = self.backend.take(participant).await? else {
            return Ok(None);
        };
        if let Some(ttl) = self.ttl {
            if Utc::now() - continuation.scheduled_at > ttl {
                log::debug!(
                    "continuation: {} for {} expired (scheduled {})",
                    continuation.path,
                    participant,
                    continuation.scheduled_at
                );
                return Ok(None);
            }
        }
        Ok(Some(continuation.path))
    }
}

/// Process-local backend; state is lost on restart.
#[derive(Default)]
pub struct MemoryContinuations {
    inner: Mutex<HashMap<String, Continuation>>,
}

impl MemoryContinuations {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContinuationBackend for MemoryContinuations {
    async fn put(&self, participant: &str, continuation: Continuation) -> Result<(), StoreError> {
        self.inner
            .lock()
            .await
            .insert(participant.to_string(), continuation);
        Ok(())
    }

    async fn take(&self, participant: &str) -> Result<Option<Continuation>, StoreError> {
        Ok(self.inner.lock().await.remove(participant))
    }
}

/// JSON file backend. Every operation holds an exclusive lock on a sidecar
/// `.lock` file, so several processes may share one state file; writes go
/// through a temp file and rename.
pub struct FileContinuations {
    path: PathBuf,
}

impl FileContinuations {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn locked<R, F>(&self, f: F) -> Result<R, StoreError>
    where
        R: Send + 'static,
        F: FnOnce(&mut HashMap<String, Continuation>) -> (R, bool) + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || update_locked(&path, f))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))?
    }
}

fn update_locked<R, F>(path: &Path, f: F) -> Result<R, StoreError>
where
    F: FnOnce(&mut HashMap<String, Continuation>) -> (R, bool),
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let lock_path = path.with_extension("lock");
    let lock = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;
    lock.lock_exclusive()?;

    let mut map: HashMap<String, Continuation> = match std::fs::read_to_string(path) {
        Ok(s) if !s.trim().is_empty() => serde_json::from_str(&s)?,
        Ok(_) => HashMap::new(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
        Err(e) => return Err(e.into()),
    };
    let (result, changed) = f(&mut map);
    if changed {
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&map)?)?;
        std::fs::rename(&tmp, path)?;
    }
    // Dropping the handle releases the lock.
    drop(lock);
    Ok(result)
}

#[async_trait]
impl ContinuationBackend for FileContinuations {
    async fn put(&self, participant: &str, continuation: Continuation) -> Result<(), StoreError> {
        let participant = participant.to_string();
        self.locked(move |map| {
            map.insert(participant, continuation);
            ((), true)
        })
        .await
    }

    async fn take(&self, participant: &str) -> Result<Option<Continuation>, StoreError> {
        let participant = participant.to_string();
        self.locked(move |map| {
            let taken = map.remove(&participant);
            let changed = taken.is_some();
            (taken, changed)
        })
        .await
    }
}

#[cfg(feature = "redis")]
pub use self::redis_backend::RedisContinuations;

#[cfg(feature = "redis")]
mod redis_backend {
    use super::{Continuation, ContinuationBackend, StoreError};
    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;

    const KEY_PREFIX: &str = "awaiting:";

    /// Redis backend: one key per participant, consumed with `GETDEL`.
    #[derive(Clone)]
    pub struct RedisContinuations {
        conn: MultiplexedConnection,
    }

    impl RedisContinuations {
        pub fn new(conn: MultiplexedConnection) -> Self {
            Self { conn }
        }

        pub async fn connect(url: &str) -> Result<Self, StoreError> {
            let client = redis::Client::open(url)?;
            let conn = client.get_multiplexed_tokio_connection().await?;
            Ok(Self::new(conn))
        }
    }

    #[async_trait]
    impl ContinuationBackend for RedisContinuations {
        async fn put(&self, participant: &str, continuation: Continuation) -> Result<(), StoreError> {
            let mut conn = self.conn.clone();
            let value = serde_json::to_string(&continuation)?;
            redis::cmd("SET")
                .arg(format!("{}{}", KEY_PREFIX, participant))
                .arg(value)
                .query_async::<_, ()>(&mut conn)
                .await?;
            Ok(())
        }

        async fn take(&self, participant: &str) -> Result<Option<Continuation>, StoreError> {
            let mut conn = self.conn.clone();
            let value: Option<String> = redis::cmd("GETDEL")
                .arg(format!("{}{}", KEY_PREFIX, participant))
                .query_async(&mut conn)
                .await?;
            match value {
                Some(v) => Ok(Some(serde_json::from_str(&v)?)),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::routes::Route;

    fn routes() -> Arc<RouteTable> {
        Arc::new(
            RouteTable::new(vec![
                Route::new("/", |_b, _e| async { Ok(()) }),
                Route::new("/sell-ticket/pdf", |_b, _e| async { Ok(()) }),
                Route::new("/sell-ticket/:id/price", |_b, _e| async { Ok(()) }),
            ])
            .unwrap(),
        )
    }

    fn temp_state_file() -> PathBuf {
        std::env::temp_dir()
            .join(format!("farebot-continuations-{}", uuid::Uuid::new_v4()))
            .join("continuations.json")
    }

    #[tokio::test]
    async fn take_returns_once_then_none() {
        let store = ContinuationStore::new(Arc::new(MemoryContinuations::new()), routes());
        store.set("u1", "/sell-ticket/pdf").await.unwrap();
        assert_eq!(store.take("u1").await.unwrap().as_deref(), Some("/sell-ticket/pdf"));
        assert_eq!(store.take("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unroutable_paths_are_not_scheduled() {
        let store = ContinuationStore::new(Arc::new(MemoryContinuations::new()), routes());
        store.set("u1", "/no/such/step").await.unwrap();
        assert_eq!(store.take("u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn later_set_replaces_pending_path() {
        let store = ContinuationStore::new(Arc::new(MemoryContinuations::new()), routes());
        store.set("u1", "/sell-ticket/pdf").await.unwrap();
        store.set("u1", "/sell-ticket/abc/price").await.unwrap();
        assert_eq!(
            store.take("u1").await.unwrap().as_deref(),
            Some("/sell-ticket/abc/price")
        );
    }

    #[tokio::test]
    async fn expired_records_are_dropped() {
        let backend = Arc::new(MemoryContinuations::new());
        backend
            .put(
                "u1",
                Continuation {
                    path: "/sell-ticket/pdf".into(),
                    scheduled_at: Utc::now() - Duration::hours(80),
                },
            )
            .await
            .unwrap();
        let store = ContinuationStore::new(backend.clone(), routes())
            .with_ttl(Some(Duration::hours(72)));
        assert_eq!(store.take("u1").await.unwrap(), None);
        // and the record is gone, not just hidden
        assert!(backend.take("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn file_backend_survives_reopen() {
        let path = temp_state_file();
        {
            let store = ContinuationStore::new(Arc::new(FileContinuations::new(&path)), routes());
            store.set("u1", "/sell-ticket/pdf").await.unwrap();
            store.set("u2", "/sell-ticket/xyz/price").await.unwrap();
        }
        let store = ContinuationStore::new(Arc::new(FileContinuations::new(&path)), routes());
        assert_eq!(store.take("u1").await.unwrap().as_deref(), Some("/sell-ticket/pdf"));
        assert_eq!(store.take("u1").await.unwrap(), None);
        assert_eq!(
            store.take("u2").await.unwrap().as_deref(),
            Some("/sell-ticket/xyz/price")
        );
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn concurrent_takes_consume_at_most_once() {
        let path = temp_state_file();
        let backend = Arc::new(FileContinuations::new(&path));
        let store = ContinuationStore::new(backend, routes());
        store.set("u1", "/sell-ticket/pdf").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let s = store.clone();
            handles.push(tokio::spawn(async move { s.take("u1").await.unwrap() }));
        }
        let mut consumed = 0;
        for h in handles {
            if h.await.unwrap().is_some() {
                consumed += 1;
            }
        }
        assert_eq!(consumed, 1);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
