//! Session coalescing, raw ping capture and retention pruning.
//!
//! Every mutation of a [`PlayerRecord`] driven by an observation goes
//! through here. The store decides *which* record to touch; this module
//! decides *how* it changes.

use crate::models::{Observation, Ping, PlayerRecord, Region, Session, Timestamp, truncate_username};
use std::time::Duration;

/// Longest gap between observations that still counts as continuous presence.
pub const DEFAULT_INACTIVITY_THRESHOLD: Duration = Duration::from_secs(3 * 60);

/// Sessions and pings older than this are dropped.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(31 * 24 * 60 * 60);

/// A join-time hint further back than this from the first observation is
/// considered bogus and ignored.
pub const MAX_JOIN_BACKDATE: Duration = Duration::from_secs(12 * 60 * 60);

/// Tunables for the recorder, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivityRules {
  pub inactivity_threshold_ms: i64,
  pub retention_ms: i64,
}

impl ActivityRules {
  pub fn new(inactivity_threshold: Duration, retention: Duration) -> Self {
    Self {
      inactivity_threshold_ms: inactivity_threshold.as_millis() as i64,
      retention_ms: retention.as_millis() as i64,
    }
  }
}

impl Default for ActivityRules {
  fn default() -> Self {
    Self::new(DEFAULT_INACTIVITY_THRESHOLD, DEFAULT_RETENTION)
  }
}

/// Counts of history removed by one pruning pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pruned {
  pub sessions: usize,
  pub pings: usize,
}

impl Pruned {
  pub fn is_empty(&self) -> bool {
    self.sessions == 0 && self.pings == 0
  }
}

impl PlayerRecord {
  /// Apply one observation: session bookkeeping, then the raw ping.
  pub fn observe(&mut self, obs: &Observation, rules: &ActivityRules) {
    self.record_activity(obs.timestamp, obs.join_time, rules);
    self.record_ping(&obs.display_name, obs.region, obs.timestamp, rules);
  }

  /// Open or extend a session for an observation at `ts`.
  ///
  /// Sessions are only ever appended or extended relative to
  /// `last_seen_activity`; a late observation never reopens or splits an
  /// older session.
  pub fn record_activity(&mut self, ts: Timestamp, join_time: Option<Timestamp>, rules: &ActivityRules) {
    let threshold = rules.inactivity_threshold_ms;
    let first_ever = self.is_unseen();

    let opens_session = match (self.sessions.last(), self.last_seen_activity) {
      (Some(_), Some(last)) => ts.saturating_sub(last) > threshold,
      _ => true,
    };

    if opens_session {
      let start = if first_ever {
        plausible_join(join_time, ts).unwrap_or(ts)
      } else {
        ts
      };
      self.sessions.push(Session { start, end: ts });
    } else if let Some(last) = self.sessions.last_mut() {
      last.end = last.end.max(ts);
    }

    self.compact_tail(threshold);

    self.last_seen_activity = Some(self.last_seen_activity.map_or(ts, |last| last.max(ts)));
    let start = self.sessions.last().map_or(ts, |s| s.start);
    self.first_seen = Some(self.first_seen.map_or(start, |first| first.min(start)));
    self.last_seen = Some(self.last_seen.map_or(ts, |last| last.max(ts)));
  }

  /// Append a raw ping, update the name/region counters and prune history
  /// using `ts` as "now".
  pub fn record_ping(&mut self, display_name: &str, region: Option<Region>, ts: Timestamp, rules: &ActivityRules) {
    let username = truncate_username(display_name);

    *self.usernames.entry(username.clone()).or_insert(0) += 1;
    self.recompute_top_usernames();

    if let Some(region) = region {
      self.region_counts.increment(region);
      self.recompute_top_region();
    }

    self.pings.push(Ping { ts, username, region });
    self.first_seen = Some(self.first_seen.map_or(ts, |first| first.min(ts)));
    self.last_seen = Some(self.last_seen.map_or(ts, |last| last.max(ts)));

    self.prune(ts, rules.retention_ms);
  }

  /// Drop sessions that ended and pings taken before `now - retention_ms`.
  pub fn prune(&mut self, now: Timestamp, retention_ms: i64) -> Pruned {
    let cutoff = now.saturating_sub(retention_ms);

    let sessions_before = self.sessions.len();
    self.sessions.retain(|s| s.end >= cutoff);
    let pings_before = self.pings.len();
    self.pings.retain(|p| p.ts >= cutoff);

    Pruned {
      sessions: sessions_before - self.sessions.len(),
      pings: pings_before - self.pings.len(),
    }
  }

  /// Merge the last two sessions when they sit within the threshold.
  fn compact_tail(&mut self, threshold: i64) {
    while self.sessions.len() >= 2 {
      let n = self.sessions.len();
      let (prev, last) = (self.sessions[n - 2], self.sessions[n - 1]);
      if last.start.saturating_sub(prev.end) > threshold {
        break;
      }
      self.sessions[n - 2] = Session {
        start: prev.start.min(last.start),
        end: prev.end.max(last.end),
      };
      self.sessions.pop();
    }
  }
}

fn plausible_join(join_time: Option<Timestamp>, ts: Timestamp) -> Option<Timestamp> {
  let max_backdate = MAX_JOIN_BACKDATE.as_millis() as i64;
  join_time.filter(|&join| ts.checked_sub(join).is_some_and(|back| (0..=max_backdate).contains(&back)))
}

#[cfg(test)]
mod tests {
  use super::*;

  const SEC: i64 = 1000;
  const DAY: i64 = 24 * 60 * 60 * SEC;

  fn rules() -> ActivityRules {
    ActivityRules::default()
  }

  fn observe_at(record: &mut PlayerRecord, ts: Timestamp) {
    record.observe(&Observation::new("p", "Alice", Some(Region::Us), ts), &rules());
  }

  #[test]
  fn test_gap_below_threshold_merges() {
    let mut record = PlayerRecord::new();
    observe_at(&mut record, 0);
    observe_at(&mut record, 100_000);

    assert_eq!(record.sessions, vec![Session { start: 0, end: 100_000 }]);
  }

  #[test]
  fn test_gap_above_threshold_splits() {
    let mut record = PlayerRecord::new();
    observe_at(&mut record, 0);
    observe_at(&mut record, 200_000);

    assert_eq!(
      record.sessions,
      vec![Session::at(0), Session::at(200_000)]
    );
  }

  #[test]
  fn test_gap_equal_to_threshold_merges() {
    let mut record = PlayerRecord::new();
    observe_at(&mut record, 0);
    observe_at(&mut record, 180_000);

    assert_eq!(record.sessions.len(), 1);
    assert_eq!(record.sessions[0].end, 180_000);
  }

  #[test]
  fn test_consecutive_sessions_are_separated_by_more_than_threshold() {
    let mut record = PlayerRecord::new();
    // 5s polling with a few long absences mixed in
    let mut ts = 1_700_000_000_000;
    let gaps = [5, 5, 5, 400, 5, 179, 181, 5, 5, 3600, 5, 180, 5];
    observe_at(&mut record, ts);
    for gap in gaps {
      ts += gap * SEC;
      observe_at(&mut record, ts);
    }

    assert_eq!(record.sessions.len(), 4);
    for pair in record.sessions.windows(2) {
      assert!(pair[0].start <= pair[0].end);
      assert!(pair[1].start - pair[0].end > rules().inactivity_threshold_ms);
    }
    assert_eq!(record.pings.len(), gaps.len() + 1);
  }

  #[test]
  fn test_first_session_backdated_to_plausible_join_time() {
    let mut record = PlayerRecord::new();
    let obs = Observation::new("p", "Alice", None, 10 * 60 * SEC).with_join_time(Some(4 * 60 * SEC));
    record.observe(&obs, &rules());

    assert_eq!(record.sessions, vec![Session { start: 4 * 60 * SEC, end: 10 * 60 * SEC }]);
    assert_eq!(record.first_seen, Some(4 * 60 * SEC));
  }

  #[test]
  fn test_join_time_ignored_when_implausible_or_not_first() {
    // join hint in the future
    let mut record = PlayerRecord::new();
    let obs = Observation::new("p", "Alice", None, 1_000).with_join_time(Some(5_000));
    record.observe(&obs, &rules());
    assert_eq!(record.sessions[0].start, 1_000);

    // join hint far in the past
    let mut record = PlayerRecord::new();
    let obs = Observation::new("p", "Alice", None, 2 * DAY).with_join_time(Some(0));
    record.observe(&obs, &rules());
    assert_eq!(record.sessions[0].start, 2 * DAY);

    // a returning player never gets backdated
    let mut record = PlayerRecord::new();
    observe_at(&mut record, 0);
    let obs = Observation::new("p", "Alice", None, 60 * 60 * SEC).with_join_time(Some(50 * 60 * SEC));
    record.observe(&obs, &rules());
    assert_eq!(record.sessions[1].start, 60 * 60 * SEC);
  }

  #[test]
  fn test_out_of_order_observation_keeps_history() {
    let mut record = PlayerRecord::new();
    observe_at(&mut record, 0);
    observe_at(&mut record, 600 * SEC);
    observe_at(&mut record, 100 * SEC);

    assert_eq!(record.sessions, vec![Session::at(0), Session::at(600 * SEC)]);
    assert_eq!(record.last_seen_activity, Some(600 * SEC));
    assert_eq!(record.pings.len(), 3);
    assert_eq!(record.pings[2].ts, 100 * SEC);
  }

  #[test]
  fn test_tail_compaction_merges_close_sessions() {
    let mut record = PlayerRecord::new();
    record.sessions = vec![Session { start: 0, end: 10 * SEC }];
    // stale activity marker forces a new session close to the previous end
    record.first_seen = Some(0);
    record.last_seen_activity = Some(-1_000 * SEC);
    record.record_activity(60 * SEC, None, &rules());

    assert_eq!(record.sessions, vec![Session { start: 0, end: 60 * SEC }]);
  }

  #[test]
  fn test_ping_updates_counters() {
    let mut record = PlayerRecord::new();
    record.record_ping("Alice", Some(Region::Eu), 0, &rules());
    record.record_ping("Alice", Some(Region::Eu), 5, &rules());
    record.record_ping("Bob", None, 10, &rules());

    assert_eq!(record.usernames["Alice"], 2);
    assert_eq!(record.usernames["Bob"], 1);
    assert_eq!(record.top_usernames[0].name, "Alice");
    assert_eq!(record.region_counts.eu, 2);
    assert_eq!(record.region_counts.us, 0);
    assert_eq!(record.top_region, Region::Eu);
    assert_eq!(record.pings.last().unwrap().region, None);
    assert!(record.sessions.is_empty());
  }

  #[test]
  fn test_retention_drops_stale_history() {
    let mut record = PlayerRecord::new();
    observe_at(&mut record, 0);
    observe_at(&mut record, 10 * DAY);

    let now = 40 * DAY;
    observe_at(&mut record, now);

    let cutoff = now - rules().retention_ms;
    assert!(record.sessions.iter().all(|s| s.end >= cutoff));
    assert!(record.pings.iter().all(|p| p.ts >= cutoff));
    assert_eq!(record.sessions, vec![Session::at(10 * DAY), Session::at(40 * DAY)]);
    assert_eq!(record.pings.len(), 2);
    // lifetime counters survive pruning
    assert_eq!(record.usernames["Alice"], 3);
    assert_eq!(record.first_seen, Some(0));
  }

  #[test]
  fn test_prune_reports_removed_counts() {
    let mut record = PlayerRecord::new();
    observe_at(&mut record, 0);
    observe_at(&mut record, 5 * SEC);

    let pruned = record.prune(60 * DAY, rules().retention_ms);
    assert_eq!(pruned, Pruned { sessions: 1, pings: 2 });
    assert!(record.prune(60 * DAY, rules().retention_ms).is_empty());
  }

  #[test]
  fn test_extreme_join_time_is_ignored() {
    let mut record = PlayerRecord::new();
    let ts = 1_700_000_000_000;
    let obs = Observation::new("p", "Alice", Some(Region::Us), ts).with_join_time(Some(i64::MIN));
    record.observe(&obs, &rules());
    assert_eq!(record.sessions, vec![Session::at(ts)]);

    let mut record = PlayerRecord::new();
    let obs = Observation::new("p", "Alice", Some(Region::Us), i64::MIN).with_join_time(Some(i64::MAX));
    record.observe(&obs, &rules());
    assert_eq!(record.sessions, vec![Session::at(i64::MIN)]);
  }

  #[test]
  fn test_extreme_timestamps_do_not_overflow() {
    let mut record = PlayerRecord::new();
    observe_at(&mut record, i64::MIN);
    observe_at(&mut record, i64::MAX);

    // the i64::MIN history is pruned relative to i64::MAX
    assert_eq!(record.sessions, vec![Session::at(i64::MAX)]);
    assert_eq!(record.pings.len(), 1);

    let mut record = PlayerRecord::new();
    observe_at(&mut record, 0);
    assert_eq!(record.prune(i64::MIN, rules().retention_ms), Pruned::default());
  }
}
