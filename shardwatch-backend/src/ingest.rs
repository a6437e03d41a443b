//! Turns one raw shard poll into observations for the store and entries for
//! the online roster.
use serde::Deserialize;
use serde_json::Value;
use shardwatch_db::{Observation, Region, is_valid_player_id, truncate_username};

use crate::roster::{OnlinePlayer, Shard};
use crate::validation::is_plausible_timestamp;

/// Smallest snake size that counts as actually playing.
const MIN_LIVE_SIZE: f64 = 2.0;

/// One poll of a shard, as sent by the poller.
#[derive(Debug, Deserialize)]
pub struct Poll {
    pub shard: String,
    /// Poll time in milliseconds; the server clock is used when absent or
    /// implausible.
    #[serde(default)]
    pub ts: Option<i64>,
    #[serde(default)]
    pub players: Vec<PollEntry>,
}

/// A player entry. Field names vary between game API versions and an entry
/// may carry several of them; the first present one wins.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollEntry {
    pub privy_id: Option<Value>,
    pub id: Option<Value>,
    pub player_id: Option<Value>,
    pub name: Option<Value>,
    pub username: Option<Value>,
    pub player_name: Option<Value>,
    pub monetary_value: Option<Value>,
    pub value: Option<Value>,
    pub money: Option<Value>,
    pub cash: Option<Value>,
    pub size: Option<Value>,
    pub snake_size: Option<Value>,
    pub length: Option<Value>,
    pub region: Option<Value>,
    pub join_time: Option<Value>,
}

impl PollEntry {
    fn player_id(&self) -> Option<String> {
        match first([&self.privy_id, &self.id, &self.player_id])? {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn display_name(&self) -> Option<&str> {
        [&self.name, &self.username, &self.player_name]
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::trim)
            .find(|n| !n.is_empty())
    }

    fn monetary_value(&self) -> Option<f64> {
        first([&self.monetary_value, &self.value, &self.money, &self.cash]).and_then(as_number)
    }

    fn size(&self) -> Option<f64> {
        first([&self.size, &self.snake_size, &self.length]).and_then(as_number)
    }

    fn region(&self) -> Option<Region> {
        self.region
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|r| Region::parse(&r.trim().to_ascii_uppercase()))
    }

    fn join_time(&self) -> Option<i64> {
        self.join_time
            .as_ref()
            .and_then(as_number)
            .map(|t| t as i64)
            .filter(|&t| is_plausible_timestamp(t))
    }
}

/// Result of filtering a poll.
#[derive(Debug, Default)]
pub struct Prepared {
    pub observations: Vec<Observation>,
    pub online: Vec<OnlinePlayer>,
    pub dropped: usize,
}

/// Apply the liveness filter and normalise every surviving entry.
pub fn prepare(shard: &Shard, entries: Vec<PollEntry>, ts: i64) -> Prepared {
    let mut prepared = Prepared::default();
    for entry in entries {
        match normalise(shard, entry, ts) {
            Some((observation, online)) => {
                prepared.observations.push(observation);
                prepared.online.push(online);
            }
            None => prepared.dropped += 1,
        }
    }
    prepared
}

fn normalise(shard: &Shard, entry: PollEntry, ts: i64) -> Option<(Observation, OnlinePlayer)> {
    let monetary_value = entry.monetary_value()?;
    let size = entry.size()?;
    if monetary_value <= 0.0 || size <= MIN_LIVE_SIZE {
        return None;
    }

    let id = entry.player_id()?;
    if !is_valid_player_id(&id) {
        return None;
    }
    let name = entry.display_name()?;
    let region = entry.region().unwrap_or(shard.region);

    let observation = Observation::new(id.clone(), name, Some(region), ts).with_join_time(entry.join_time());
    let online = OnlinePlayer {
        id,
        name: truncate_username(name),
        monetary_value,
        since: ts,
    };
    Some((observation, online))
}

/// First alias that was present and not null.
fn first<const N: usize>(candidates: [&Option<Value>; N]) -> Option<&Value> {
    candidates.into_iter().flatten().find(|v| !v.is_null())
}

/// Numbers arrive as JSON numbers or numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
}
