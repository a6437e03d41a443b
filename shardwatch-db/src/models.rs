use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Milliseconds since the Unix epoch (UTC).
pub type Timestamp = i64;

/// Display names longer than this are truncated on ingestion.
pub const MAX_USERNAME_CHARS: usize = 48;

/// Longest player id accepted as well-formed.
pub const MAX_PLAYER_ID_CHARS: usize = 128;

/// Longest percent-encoded id, leaving room for `.json.corrupt` inside a
/// 255-byte file name.
pub const MAX_ENCODED_ID_BYTES: usize = 240;

/// How many names are kept in `top_usernames`.
pub const TOP_USERNAMES: usize = 3;

/// Game region a shard belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Region {
  #[default]
  #[serde(rename = "US")]
  Us,
  #[serde(rename = "EU")]
  Eu,
}

impl Region {
  /// Parse a region tag. Only the exact strings "US" and "EU" are accepted.
  pub fn parse(value: &str) -> Option<Self> {
    match value {
      "US" => Some(Region::Us),
      "EU" => Some(Region::Eu),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Region::Us => "US",
      Region::Eu => "EU",
    }
  }
}

/// One contiguous block of presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
  pub start: Timestamp,
  pub end: Timestamp,
}

impl Session {
  pub fn at(ts: Timestamp) -> Self {
    Self { start: ts, end: ts }
  }
}

/// One raw observation, kept for per-bin metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
  pub ts: Timestamp,
  pub username: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub region: Option<Region>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameCount {
  pub name: String,
  pub count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCounts {
  #[serde(rename = "US", default)]
  pub us: u64,
  #[serde(rename = "EU", default)]
  pub eu: u64,
}

impl RegionCounts {
  pub fn increment(&mut self, region: Region) {
    match region {
      Region::Us => self.us += 1,
      Region::Eu => self.eu += 1,
    }
  }

  /// Dominant region; a tie goes to US.
  pub fn top(&self) -> Region {
    if self.eu > self.us { Region::Eu } else { Region::Us }
  }
}

/// The durable unit for one player.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerRecord {
  /// Assigned administratively; ingestion never writes it.
  pub real_name: Option<String>,
  pub usernames: HashMap<String, u64>,
  pub top_usernames: Vec<UsernameCount>,
  pub region_counts: RegionCounts,
  pub top_region: Region,
  pub first_seen: Option<Timestamp>,
  pub last_seen: Option<Timestamp>,
  pub last_seen_activity: Option<Timestamp>,
  pub sessions: Vec<Session>,
  pub pings: Vec<Ping>,
}

impl PlayerRecord {
  pub fn new() -> Self {
    Self::default()
  }

  /// True until the first observation has been recorded.
  pub fn is_unseen(&self) -> bool {
    self.first_seen.is_none()
  }

  /// Rebuild `top_usernames` from the lifetime counts.
  ///
  /// Ordered by count descending; equal counts are ordered by name so the
  /// result does not depend on map iteration order.
  pub fn recompute_top_usernames(&mut self) {
    let mut entries: Vec<(&String, &u64)> = self.usernames.iter().filter(|(_, c)| **c > 0).collect();
    entries.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    self.top_usernames = entries
      .into_iter()
      .take(TOP_USERNAMES)
      .map(|(name, count)| UsernameCount {
        name: name.clone(),
        count: *count,
      })
      .collect();
  }

  pub fn recompute_top_region(&mut self) {
    self.top_region = self.region_counts.top();
  }

  /// Public view of the record, without raw history.
  pub fn snapshot(&self) -> PlayerSnapshot {
    PlayerSnapshot {
      real_name: self.real_name.clone(),
      usernames: self.usernames.clone(),
      top_usernames: self.top_usernames.clone(),
      region_counts: self.region_counts,
      top_region: self.top_region,
    }
  }
}

/// Sanitized player view handed to mapping/admin consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSnapshot {
  pub real_name: Option<String>,
  pub usernames: HashMap<String, u64>,
  pub top_usernames: Vec<UsernameCount>,
  pub region_counts: RegionCounts,
  pub top_region: Region,
}

/// A single presence observation that passed the poller's liveness filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
  pub player_id: String,
  pub display_name: String,
  pub region: Option<Region>,
  pub timestamp: Timestamp,
  /// Only consulted for a player's very first session.
  pub join_time: Option<Timestamp>,
}

impl Observation {
  pub fn new(player_id: impl Into<String>, display_name: &str, region: Option<Region>, timestamp: Timestamp) -> Self {
    Self {
      player_id: player_id.into(),
      display_name: truncate_username(display_name),
      region,
      timestamp,
      join_time: None,
    }
  }

  pub fn with_join_time(mut self, join_time: Option<Timestamp>) -> Self {
    self.join_time = join_time;
    self
  }
}

/// Truncate a display name to `MAX_USERNAME_CHARS` characters.
pub fn truncate_username(name: &str) -> String {
  match name.char_indices().nth(MAX_USERNAME_CHARS) {
    Some((idx, _)) => name[..idx].to_string(),
    None => name.to_string(),
  }
}

/// Whether `id` looks like a player id: non-empty, bounded, and made of
/// alphanumerics plus `:` `_` `-` `.`. The bound also applies to the id's
/// file name, where `:` and `.` take three bytes each.
pub fn is_valid_player_id(id: &str) -> bool {
  if id.is_empty() || id.len() > MAX_PLAYER_ID_CHARS {
    return false;
  }
  let mut encoded = 0;
  for c in id.chars() {
    encoded += match c {
      c if c.is_ascii_alphanumeric() => 1,
      '_' | '-' => 1,
      ':' | '.' => 3,
      _ => return false,
    };
  }
  encoded <= MAX_ENCODED_ID_BYTES
}
