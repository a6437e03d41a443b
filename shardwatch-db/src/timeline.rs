//! Time-binned activity timelines aligned to the caller's local clock.

use crate::models::{PlayerRecord, Region, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

const MINUTE_MS: i64 = 60 * 1000;
const HOUR_MS: i64 = 60 * MINUTE_MS;

/// Offsets beyond ±14h do not exist on Earth.
pub const MAX_TZ_OFFSET_MINUTES: i32 = 14 * 60;

/// Query granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowClass {
  #[serde(rename = "1h")]
  Hour,
  #[serde(rename = "1d")]
  Day,
  #[serde(rename = "1w")]
  Week,
  #[serde(rename = "1m")]
  Month,
}

impl WindowClass {
  pub const ALL: [WindowClass; 4] = [WindowClass::Hour, WindowClass::Day, WindowClass::Week, WindowClass::Month];

  pub fn bin_width_ms(&self) -> i64 {
    match self {
      WindowClass::Hour => 5 * MINUTE_MS,
      WindowClass::Day => HOUR_MS,
      WindowClass::Week => 12 * HOUR_MS,
      WindowClass::Month => 24 * HOUR_MS,
    }
  }

  pub fn bin_count(&self) -> usize {
    match self {
      WindowClass::Hour => 12,
      WindowClass::Day => 24,
      WindowClass::Week => 14,
      WindowClass::Month => 30,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      WindowClass::Hour => "1h",
      WindowClass::Day => "1d",
      WindowClass::Week => "1w",
      WindowClass::Month => "1m",
    }
  }
}

impl fmt::Display for WindowClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownWindowClass(pub String);

impl fmt::Display for UnknownWindowClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "unknown window class '{}' (expected 1h, 1d, 1w or 1m)", self.0)
  }
}

impl std::error::Error for UnknownWindowClass {}

impl FromStr for WindowClass {
  type Err = UnknownWindowClass;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "1h" => Ok(WindowClass::Hour),
      "1d" => Ok(WindowClass::Day),
      "1w" => Ok(WindowClass::Week),
      "1m" => Ok(WindowClass::Month),
      other => Err(UnknownWindowClass(other.to_string())),
    }
  }
}

/// Metadata for one bin. Empty bins serialize as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinMeta {
  #[serde(skip_serializing_if = "Option::is_none")]
  pub top_username: Option<String>,
  #[serde(skip_serializing_if = "is_zero")]
  pub pings: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub top_region: Option<Region>,
  #[serde(skip_serializing_if = "is_zero")]
  pub top_region_ping_count: u32,
}

fn is_zero(n: &u32) -> bool {
  *n == 0
}

/// Bitmap plus per-bin metadata for one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bins {
  pub bitmap: String,
  pub meta: Vec<BinMeta>,
}

/// Single-player timeline response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
  pub start_timestamp: Timestamp,
  pub bin_width: i64,
  pub bitmap: String,
  pub meta: Vec<BinMeta>,
}

/// Multi-player timeline response; every id shares one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTimeline {
  pub start_timestamp: Timestamp,
  pub bin_width: i64,
  pub data: BTreeMap<String, String>,
  pub meta: BTreeMap<String, Vec<BinMeta>>,
}

/// A window of fixed-width bins, right-aligned to the last local bin
/// boundary at or before "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineWindow {
  pub class: WindowClass,
  /// UTC start of the first bin.
  pub start: Timestamp,
  pub bin_width: i64,
  pub bin_count: usize,
}

impl TimelineWindow {
  /// Align a window for a client whose clock is `tz_offset_minutes` behind
  /// UTC (the sign convention of `Date.getTimezoneOffset`).
  pub fn aligned(class: WindowClass, tz_offset_minutes: i32, now: Timestamp) -> Self {
    let bin_width = class.bin_width_ms();
    let bin_count = class.bin_count();
    let offset_ms = i64::from(tz_offset_minutes) * MINUTE_MS;

    let local_now = now - offset_ms;
    let aligned_right = local_now.div_euclid(bin_width) * bin_width;
    let start_local = aligned_right - (bin_count as i64 - 1) * bin_width;

    Self {
      class,
      start: start_local + offset_ms,
      bin_width,
      bin_count,
    }
  }

  /// Exclusive UTC end of the last bin.
  pub fn end(&self) -> Timestamp {
    self.start + self.bin_count as i64 * self.bin_width
  }

  fn bin_index(&self, ts: Timestamp) -> Option<usize> {
    if ts < self.start || ts >= self.end() {
      return None;
    }
    Some(((ts - self.start) / self.bin_width) as usize)
  }

  /// The result for a player that has never been seen.
  pub fn empty(&self) -> Bins {
    Bins {
      bitmap: "0".repeat(self.bin_count),
      meta: vec![BinMeta::default(); self.bin_count],
    }
  }

  /// Bin a record's sessions and pings. Never mutates the record.
  pub fn compute(&self, record: &PlayerRecord) -> Bins {
    let mut bits = vec![false; self.bin_count];
    let end = self.end();

    for session in &record.sessions {
      if session.end < self.start || session.start >= end {
        continue;
      }
      let first = (session.start.max(self.start) - self.start) / self.bin_width;
      let last = (session.end.min(end - 1) - self.start) / self.bin_width;
      if first > last {
        continue;
      }
      for bit in &mut bits[first as usize..=last as usize] {
        *bit = true;
      }
    }

    let mut tallies: Vec<BinTally> = (0..self.bin_count).map(|_| BinTally::default()).collect();
    for ping in &record.pings {
      if let Some(idx) = self.bin_index(ping.ts) {
        tallies[idx].add(&ping.username, ping.region);
      }
    }

    Bins {
      bitmap: bits.iter().map(|&b| if b { '1' } else { '0' }).collect(),
      meta: tallies.into_iter().map(BinTally::reduce).collect(),
    }
  }

  pub fn timeline(&self, bins: Bins) -> Timeline {
    Timeline {
      start_timestamp: self.start,
      bin_width: self.bin_width,
      bitmap: bins.bitmap,
      meta: bins.meta,
    }
  }
}

#[derive(Default)]
struct BinTally<'a> {
  usernames: HashMap<&'a str, u32>,
  regions: HashMap<Region, u32>,
  pings: u32,
}

impl<'a> BinTally<'a> {
  fn add(&mut self, username: &'a str, region: Option<Region>) {
    self.pings += 1;
    *self.usernames.entry(username).or_insert(0) += 1;
    if let Some(region) = region {
      *self.regions.entry(region).or_insert(0) += 1;
    }
  }

  /// Most frequent name and region. Ties go to the lexicographically
  /// smallest name, and to US for regions.
  fn reduce(self) -> BinMeta {
    if self.pings == 0 {
      return BinMeta::default();
    }

    let top_username = self
      .usernames
      .into_iter()
      .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
      .map(|(name, _)| name.to_string());

    let top_region = self
      .regions
      .into_iter()
      .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)));

    BinMeta {
      top_username,
      pings: self.pings,
      top_region: top_region.map(|(region, _)| region),
      top_region_ping_count: top_region.map_or(0, |(_, count)| count),
    }
  }
}
