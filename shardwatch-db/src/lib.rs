mod error;
mod files;
mod models;
mod recorder;
mod store;
mod timeline;

pub use error::{DbError, Result};
pub use models::{
  MAX_USERNAME_CHARS, Observation, Ping, PlayerRecord, PlayerSnapshot, Region, RegionCounts, Session, Timestamp,
  UsernameCount, is_valid_player_id, truncate_username,
};
pub use recorder::{ActivityRules, DEFAULT_INACTIVITY_THRESHOLD, DEFAULT_RETENTION, Pruned};
pub use store::{
  CleanupReport, DEFAULT_CACHE_CAPACITY, FlushReport, MAX_BATCH_IDS, PENDING_ID_PREFIX, PlayerStore, StoreOptions,
  StoreStats,
};
pub use timeline::{BatchTimeline, BinMeta, Bins, MAX_TZ_OFFSET_MINUTES, Timeline, TimelineWindow, WindowClass};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Handle to the player store shared by ingestion, queries and the flush
/// scheduler.
///
/// Every operation runs as one closure on the blocking pool while holding
/// the store lock, so operations never interleave and file writes are never
/// issued in parallel.
#[derive(Clone)]
pub struct Database {
  store: Arc<Mutex<PlayerStore>>,
}

impl Database {
  /// Open or create a store rooted at the given directory.
  pub async fn open(dir: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
    let dir = dir.into();
    let store = tokio::task::spawn_blocking(move || PlayerStore::open(dir, options)).await??;
    info!("database initialized");
    Ok(Self {
      store: Arc::new(Mutex::new(store)),
    })
  }

  /// Run `f` against the store with exclusive access.
  pub async fn call<F, R>(&self, f: F) -> Result<R>
  where
    F: FnOnce(&mut PlayerStore) -> R + Send + 'static,
    R: Send + 'static,
  {
    let store = Arc::clone(&self.store);
    let out = tokio::task::spawn_blocking(move || {
      let mut guard = store.blocking_lock();
      f(&mut guard)
    })
    .await?;
    Ok(out)
  }

  // ========================================================================
  // Ingestion
  // ========================================================================

  /// Record one shard poll worth of observations.
  pub async fn record_observations(&self, observations: Vec<Observation>) -> Result<usize> {
    let recorded = self.call(move |store| store.record_observations(&observations)).await?;
    debug!(recorded, "recorded observations");
    Ok(recorded)
  }

  /// Record one observation; `false` when its player id is malformed.
  pub async fn record_observation(&self, observation: Observation) -> Result<bool> {
    self.call(move |store| store.record_observation(&observation)).await
  }

  // ========================================================================
  // Queries
  // ========================================================================

  pub async fn timeline(&self, id: String, class: WindowClass, tz_offset_minutes: i32, now: Timestamp) -> Result<Timeline> {
    self.call(move |store| store.timeline(&id, class, tz_offset_minutes, now)).await
  }

  pub async fn batch_timeline(
    &self,
    ids: Vec<String>,
    class: WindowClass,
    tz_offset_minutes: i32,
    now: Timestamp,
  ) -> Result<BatchTimeline> {
    self.call(move |store| store.batch_timeline(&ids, class, tz_offset_minutes, now)).await
  }

  pub async fn snapshot(&self, id: String) -> Result<Option<PlayerSnapshot>> {
    self.call(move |store| store.snapshot(&id)).await
  }

  pub async fn snapshot_all(&self) -> Result<BTreeMap<String, PlayerSnapshot>> {
    self.call(|store| store.snapshot_all()).await?
  }

  pub async fn list_ids(&self) -> Result<Vec<String>> {
    self.call(|store| store.list_ids()).await?
  }

  pub async fn stats(&self) -> Result<StoreStats> {
    self.call(|store| store.stats()).await
  }

  // ========================================================================
  // Administration
  // ========================================================================

  pub async fn set_real_name(&self, id: String, real_name: Option<String>) -> Result<PlayerSnapshot> {
    self.call(move |store| store.set_real_name(&id, real_name)).await?
  }

  pub async fn delete_player(&self, id: String) -> Result<bool> {
    self.call(move |store| store.delete(&id)).await?
  }

  pub async fn flush(&self) -> Result<FlushReport> {
    self.call(|store| store.flush_dirty()).await
  }

  pub async fn reset(&self) -> Result<usize> {
    self.call(|store| store.reset()).await?
  }

  pub async fn cleanup(&self, now: Timestamp) -> Result<CleanupReport> {
    self.call(move |store| store.cleanup(now)).await?
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn now() -> Timestamp {
    1_700_000_000_000 // Fixed timestamp for testing
  }

  async fn open_db() -> (tempfile::TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(dir.path(), StoreOptions::default()).await.unwrap();
    (dir, db)
  }

  #[tokio::test]
  async fn test_poll_to_timeline() {
    let (_dir, db) = open_db().await;

    let poll = vec![
      Observation::new("p1", "Alice", Some(Region::Us), now()),
      Observation::new("p2", "Bob", Some(Region::Eu), now()),
    ];
    assert_eq!(db.record_observations(poll).await.unwrap(), 2);

    let timeline = db.timeline("p1".to_string(), WindowClass::Hour, 0, now()).await.unwrap();
    assert_eq!(timeline.bitmap, format!("{}1", "0".repeat(11)));
    assert_eq!(timeline.meta[11].top_username.as_deref(), Some("Alice"));

    let batch = db
      .batch_timeline(vec!["p2".to_string(), "neverSeen".to_string()], WindowClass::Day, 0, now())
      .await
      .unwrap();
    assert_eq!(batch.start_timestamp, TimelineWindow::aligned(WindowClass::Day, 0, now()).start);
    assert_eq!(batch.data["neverSeen"], "0".repeat(24));
    assert_eq!(batch.meta["p2"][23].top_region, Some(Region::Eu));
  }

  #[tokio::test]
  async fn test_flush_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
      let db = Database::open(dir.path(), StoreOptions::default()).await.unwrap();
      db.record_observation(Observation::new("p1", "Alice", None, now())).await.unwrap();
      db.set_real_name("p1".to_string(), Some("Alice L".to_string())).await.unwrap();
      let report = db.flush().await.unwrap();
      assert_eq!(report.written, 1);
    }

    let db = Database::open(dir.path(), StoreOptions::default()).await.unwrap();
    let snapshot = db.snapshot("p1".to_string()).await.unwrap().unwrap();
    assert_eq!(snapshot.real_name.as_deref(), Some("Alice L"));
    assert_eq!(snapshot.usernames["Alice"], 1);
    assert_eq!(db.list_ids().await.unwrap(), vec!["p1".to_string()]);
  }

  #[tokio::test]
  async fn test_admin_operations() {
    let (_dir, db) = open_db().await;
    db.record_observation(Observation::new("p1", "Alice", None, now())).await.unwrap();
    db.record_observation(Observation::new("p2", "Bob", None, now())).await.unwrap();

    assert_eq!(db.stats().await.unwrap().dirty, 2);
    assert!(db.delete_player("p1".to_string()).await.unwrap());
    assert!(!db.delete_player("p1".to_string()).await.unwrap());
    assert!(db.snapshot("p1".to_string()).await.unwrap().is_none());

    assert_eq!(db.snapshot_all().await.unwrap().len(), 1);
    assert_eq!(db.reset().await.unwrap(), 1);
    assert!(db.snapshot_all().await.unwrap().is_empty());

    let stats = db.stats().await.unwrap();
    assert_eq!(stats.cached, 0);
    assert_eq!(stats.capacity, DEFAULT_CACHE_CAPACITY);
  }

  #[tokio::test]
  async fn test_concurrent_callers_are_serialized() {
    let (_dir, db) = open_db().await;
    let mut handles = Vec::new();
    for i in 0..20i64 {
      let db = db.clone();
      handles.push(tokio::spawn(async move {
        db.record_observation(Observation::new("p1", "Alice", None, now() + i * 1000)).await
      }));
    }
    for handle in handles {
      handle.await.unwrap().unwrap();
    }

    let snapshot = db.snapshot("p1".to_string()).await.unwrap().unwrap();
    assert_eq!(snapshot.usernames["Alice"], 20);
  }
}
