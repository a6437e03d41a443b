//! Bounded LRU cache of player records over per-player files.
//!
//! The cache holds the hot working set; the files are authoritative for
//! anything not cached. Changes are collected in a dirty set and written
//! out by [`PlayerStore::flush_dirty`]. A dirty record pushed out of the
//! cache by overflow is written before it is dropped.

use crate::error::{DbError, Result};
use crate::files::RecordFiles;
use crate::models::{Observation, PlayerRecord, PlayerSnapshot, Timestamp, is_valid_player_id};
use crate::recorder::{ActivityRules, DEFAULT_INACTIVITY_THRESHOLD, DEFAULT_RETENTION};
use crate::timeline::{BatchTimeline, Timeline, TimelineWindow, WindowClass};
use lru::LruCache;
use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CACHE_CAPACITY: usize = 200;

/// Most ids answered by one batch query; extra ids are ignored.
pub const MAX_BATCH_IDS: usize = 50;

/// Ids with this prefix are placeholders from before a real id was known.
pub const PENDING_ID_PREFIX: &str = "pending:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
  pub capacity: usize,
  pub inactivity_threshold: Duration,
  pub retention: Duration,
}

impl Default for StoreOptions {
  fn default() -> Self {
    Self {
      capacity: DEFAULT_CACHE_CAPACITY,
      inactivity_threshold: DEFAULT_INACTIVITY_THRESHOLD,
      retention: DEFAULT_RETENTION,
    }
  }
}

/// Outcome of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
  pub written: usize,
  pub failed: usize,
}

/// Outcome of [`PlayerStore::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
  pub removed_pending: usize,
  pub removed_anonymous_names: usize,
  pub pruned_empty_players: usize,
  pub pruned_history: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
  pub cached: usize,
  pub dirty: usize,
  pub capacity: usize,
}

pub struct PlayerStore {
  files: RecordFiles,
  cache: LruCache<String, PlayerRecord>,
  dirty: HashSet<String>,
  rules: ActivityRules,
}

impl PlayerStore {
  pub fn open(dir: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
    let files = RecordFiles::open(dir)?;
    let capacity = NonZeroUsize::new(options.capacity).unwrap_or(NonZeroUsize::MIN);
    info!(dir = %files.dir().display(), capacity = capacity.get(), "player store opened");
    Ok(Self {
      files,
      cache: LruCache::new(capacity),
      dirty: HashSet::new(),
      rules: ActivityRules::new(options.inactivity_threshold, options.retention),
    })
  }

  pub fn rules(&self) -> &ActivityRules {
    &self.rules
  }

  // ========================================================================
  // Cache
  // ========================================================================

  /// Fetch a record, refreshing its recency.
  ///
  /// Misses fall through to disk. An unreadable file is quarantined and
  /// treated as absent. With `create_if_missing`, an absent record is
  /// created, cached and marked dirty.
  pub fn get(&mut self, id: &str, create_if_missing: bool) -> Option<&mut PlayerRecord> {
    if self.cache.contains(id) {
      return self.cache.get_mut(id);
    }

    let loaded = match self.files.read(id) {
      Ok(record) => record,
      Err(DbError::Json(e)) => {
        warn!(player_id = %id, error = %e, "corrupt player file, treating as absent");
        if let Err(e) = self.files.quarantine(id) {
          error!(player_id = %id, error = %e, "failed to move corrupt player file aside");
        }
        None
      }
      Err(e) => {
        warn!(player_id = %id, error = %e, "failed to read player file, treating as absent");
        None
      }
    };

    let record = match loaded {
      Some(record) => record,
      None if create_if_missing => {
        self.dirty.insert(id.to_string());
        debug!(player_id = %id, "created player record");
        PlayerRecord::new()
      }
      None => return None,
    };

    self.insert(id.to_string(), record);
    self.cache.get_mut(id)
  }

  /// Look at a cached or on-disk record without touching the cache.
  fn read_through(&self, id: &str) -> Option<PlayerRecord> {
    if let Some(record) = self.cache.peek(id) {
      return Some(record.clone());
    }
    match self.files.read(id) {
      Ok(record) => record,
      Err(e) => {
        warn!(player_id = %id, error = %e, "failed to read player file");
        None
      }
    }
  }

  fn insert(&mut self, id: String, record: PlayerRecord) {
    if let Some((evicted_id, evicted)) = self.cache.push(id, record) {
      self.evicted(evicted_id, evicted);
    }
  }

  /// Write an evicted record if it carried unflushed changes.
  fn evicted(&mut self, id: String, record: PlayerRecord) {
    if !self.dirty.remove(&id) {
      debug!(player_id = %id, "evicted clean player record");
      return;
    }
    match self.files.write_atomic(&id, &record) {
      Ok(()) => debug!(player_id = %id, "flushed player record on eviction"),
      Err(e) => error!(player_id = %id, error = %e, "lost unflushed changes of evicted player record"),
    }
  }

  pub fn mark_dirty(&mut self, id: &str) {
    self.dirty.insert(id.to_string());
  }

  pub fn is_dirty(&self, id: &str) -> bool {
    self.dirty.contains(id)
  }

  pub fn is_cached(&self, id: &str) -> bool {
    self.cache.contains(id)
  }

  pub fn stats(&self) -> StoreStats {
    StoreStats {
      cached: self.cache.len(),
      dirty: self.dirty.len(),
      capacity: self.cache.cap().get(),
    }
  }

  // ========================================================================
  // Persistence
  // ========================================================================

  /// Write every dirty record. A failed write stays dirty for the next
  /// pass and does not stop the others.
  pub fn flush_dirty(&mut self) -> FlushReport {
    let mut report = FlushReport::default();
    let mut ids: Vec<String> = self.dirty.iter().cloned().collect();
    ids.sort();

    for id in ids {
      let Some(record) = self.cache.peek(&id) else {
        // evicted records are written on eviction
        self.dirty.remove(&id);
        continue;
      };
      match self.files.write_atomic(&id, record) {
        Ok(()) => {
          self.dirty.remove(&id);
          report.written += 1;
        }
        Err(e) => {
          error!(player_id = %id, error = %e, "failed to flush player record");
          report.failed += 1;
        }
      }
    }

    if report.written > 0 || report.failed > 0 {
      debug!(written = report.written, failed = report.failed, "flushed dirty player records");
    }
    report
  }

  /// Drop a record from the cache and from disk. Returns whether it existed.
  pub fn delete(&mut self, id: &str) -> Result<bool> {
    let cached = self.cache.pop(id).is_some();
    self.dirty.remove(id);
    let on_disk = self.files.delete(id)?;
    info!(player_id = %id, "deleted player record");
    Ok(cached || on_disk)
  }

  /// Remove every record. Returns how many distinct ids were removed.
  pub fn reset(&mut self) -> Result<usize> {
    let mut ids: HashSet<String> = self.files.list_ids()?.into_iter().collect();
    ids.extend(self.cache.iter().map(|(id, _)| id.clone()));

    self.cache.clear();
    self.dirty.clear();
    self.files.clear()?;

    info!(removed = ids.len(), "reset player store");
    Ok(ids.len())
  }

  /// Ids known on disk or in the cache, sorted.
  pub fn list_ids(&self) -> Result<Vec<String>> {
    let mut ids: HashSet<String> = self.files.list_ids()?.into_iter().collect();
    ids.extend(self.cache.iter().map(|(id, _)| id.clone()));
    let mut ids: Vec<String> = ids.into_iter().collect();
    ids.sort();
    Ok(ids)
  }

  // ========================================================================
  // Recording
  // ========================================================================

  /// Record one observation for its player, creating the record on first
  /// sight. Observations for malformed ids are skipped; returns whether it
  /// was applied.
  pub fn record_observation(&mut self, obs: &Observation) -> bool {
    let rules = self.rules;
    let Some(record) = self.recordable(&obs.player_id) else {
      return false;
    };
    record.observe(obs, &rules);
    self.mark_dirty(&obs.player_id);
    true
  }

  /// Record a raw ping only, without session bookkeeping.
  pub fn record_ping(&mut self, obs: &Observation) -> bool {
    let rules = self.rules;
    let Some(record) = self.recordable(&obs.player_id) else {
      return false;
    };
    record.record_ping(&obs.display_name, obs.region, obs.timestamp, &rules);
    self.mark_dirty(&obs.player_id);
    true
  }

  /// Record a whole poll; returns how many observations were applied.
  pub fn record_observations(&mut self, observations: &[Observation]) -> usize {
    observations.iter().filter(|obs| self.record_observation(obs)).count()
  }

  fn recordable(&mut self, id: &str) -> Option<&mut PlayerRecord> {
    if !is_valid_player_id(id) {
      warn!(player_id = %id, "skipping observation for malformed player id");
      return None;
    }
    self.get(id, true)
  }

  /// Set the administratively assigned real name, creating the record if
  /// needed. `None` clears it.
  pub fn set_real_name(&mut self, id: &str, real_name: Option<String>) -> Result<PlayerSnapshot> {
    if !is_valid_player_id(id) {
      return Err(DbError::InvalidPlayerId);
    }
    let record = self.get(id, true).ok_or(DbError::PlayerNotFound)?;
    record.real_name = real_name;
    let snapshot = record.snapshot();
    self.mark_dirty(id);
    Ok(snapshot)
  }

  // ========================================================================
  // Queries
  // ========================================================================

  pub fn snapshot(&mut self, id: &str) -> Option<PlayerSnapshot> {
    if !is_valid_player_id(id) {
      return None;
    }
    self.get(id, false).map(|record| record.snapshot())
  }

  /// Snapshot of every known player. Reads cold records straight from disk
  /// so the hot set stays cached.
  pub fn snapshot_all(&self) -> Result<BTreeMap<String, PlayerSnapshot>> {
    let mut out = BTreeMap::new();
    for id in self.list_ids()? {
      if let Some(record) = self.read_through(&id) {
        out.insert(id, record.snapshot());
      }
    }
    Ok(out)
  }

  pub fn timeline(&mut self, id: &str, class: WindowClass, tz_offset_minutes: i32, now: Timestamp) -> Timeline {
    let window = TimelineWindow::aligned(class, tz_offset_minutes, now);
    let bins = self.bins_for(&window, id);
    window.timeline(bins)
  }

  /// Timelines for up to [`MAX_BATCH_IDS`] players sharing one window.
  /// Unknown or malformed ids come back as empty timelines.
  pub fn batch_timeline(&mut self, ids: &[String], class: WindowClass, tz_offset_minutes: i32, now: Timestamp) -> BatchTimeline {
    let window = TimelineWindow::aligned(class, tz_offset_minutes, now);
    let mut data = BTreeMap::new();
    let mut meta = BTreeMap::new();

    for id in ids.iter().take(MAX_BATCH_IDS) {
      if data.contains_key(id) {
        continue;
      }
      let bins = self.bins_for(&window, id);
      data.insert(id.clone(), bins.bitmap);
      meta.insert(id.clone(), bins.meta);
    }

    BatchTimeline {
      start_timestamp: window.start,
      bin_width: window.bin_width,
      data,
      meta,
    }
  }

  fn bins_for(&mut self, window: &TimelineWindow, id: &str) -> crate::timeline::Bins {
    if !is_valid_player_id(id) {
      return window.empty();
    }
    match self.get(id, false) {
      Some(record) => window.compute(record),
      None => window.empty(),
    }
  }

  // ========================================================================
  // Maintenance
  // ========================================================================

  /// Scrub the whole store:
  /// - drop placeholder `pending:` ids
  /// - strip "Anonymous Player" display names
  /// - drop records left with no names and no real name
  /// - prune history past the retention horizon
  pub fn cleanup(&mut self, now: Timestamp) -> Result<CleanupReport> {
    let mut report = CleanupReport::default();
    let retention_ms = self.rules.retention_ms;

    for id in self.list_ids()? {
      if id.starts_with(PENDING_ID_PREFIX) {
        self.delete(&id)?;
        report.removed_pending += 1;
        continue;
      }

      let Some(record) = self.get(&id, false) else {
        continue;
      };

      let anonymous: Vec<String> = record.usernames.keys().filter(|name| is_anonymous_name(name)).cloned().collect();
      for name in &anonymous {
        record.usernames.remove(name);
      }
      record.recompute_top_usernames();
      let pruned = record.prune(now, retention_ms);
      report.removed_anonymous_names += anonymous.len();

      let has_real_name = record.real_name.as_deref().is_some_and(|n| !n.trim().is_empty());
      if record.usernames.is_empty() && !has_real_name {
        self.delete(&id)?;
        report.pruned_empty_players += 1;
        continue;
      }

      report.pruned_history += pruned.sessions + pruned.pings;
      if !anonymous.is_empty() || !pruned.is_empty() {
        self.mark_dirty(&id);
      }
    }

    info!(
      removed_pending = report.removed_pending,
      removed_anonymous_names = report.removed_anonymous_names,
      pruned_empty_players = report.pruned_empty_players,
      pruned_history = report.pruned_history,
      "cleanup finished"
    );
    Ok(report)
  }
}

/// "Anonymous Player", any case, any whitespace between the words.
fn is_anonymous_name(name: &str) -> bool {
  let mut words = name.split_whitespace();
  matches!(
    (words.next(), words.next(), words.next()),
    (Some(a), Some(b), None) if a.eq_ignore_ascii_case("anonymous") && b.eq_ignore_ascii_case("player")
  )
}
