use arrayvec::ArrayString;
use scc::HashMap;
use serde::Serialize;
use shardwatch_db::Region;

use crate::validation::ValidationError;

/// Shard key such as "us-20", stored inline.
pub type ShardKey = ArrayString<8>;

/// Buy-in tiers each region runs a shard for.
const TIERS: [u8; 3] = [1, 5, 20];

/// One game shard: a region and a buy-in tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub key: ShardKey,
    pub region: Region,
}

impl Shard {
    /// Parse "us-1", "EU-20" and friends.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let unknown = || ValidationError::UnknownShard(raw.to_string());
        let lower = raw.trim().to_ascii_lowercase();
        let (region, tier) = lower.split_once('-').ok_or_else(unknown)?;
        let region = match region {
            "us" => Region::Us,
            "eu" => Region::Eu,
            _ => return Err(unknown()),
        };
        let tier: u8 = tier.parse().map_err(|_| unknown())?;
        if !TIERS.contains(&tier) {
            return Err(unknown());
        }
        let key = ShardKey::from(&format!("{}-{}", region.as_str().to_ascii_lowercase(), tier)).map_err(|_| unknown())?;
        Ok(Self { key, region })
    }

    /// All six shards.
    pub fn all() -> Vec<Shard> {
        [Region::Us, Region::Eu]
            .into_iter()
            .flat_map(|region| {
                TIERS.into_iter().filter_map(move |tier| {
                    let key = format!("{}-{}", region.as_str().to_ascii_lowercase(), tier);
                    ShardKey::from(&key).ok().map(|key| Shard { key, region })
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlinePlayer {
    pub id: String,
    pub name: String,
    pub monetary_value: f64,
    /// Millisecond timestamp of the first poll this player appeared in.
    pub since: i64,
}

pub struct ShardState {
    pub players: Vec<OnlinePlayer>,
    pub polled_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardSummary {
    pub shard: String,
    pub region: Region,
    pub online: usize,
    pub polled_at: Option<i64>,
}

/// Who was on each shard at its latest poll.
/// Ephemeral: rebuilt from the next poll after a restart.
pub struct OnlineRoster {
    shards: HashMap<ShardKey, ShardState>,
}

impl OnlineRoster {
    pub fn new() -> Self {
        Self {
            shards: HashMap::new(),
        }
    }

    /// Replace a shard's roster with the latest poll. Players already on the
    /// roster keep their original `since`.
    pub async fn sync_shard(&self, shard: &Shard, players: Vec<OnlinePlayer>, now: i64) {
        loop {
            let updated = self
                .shards
                .update_async(&shard.key, |_, state| {
                    state.players = carry_since(&state.players, players.clone());
                    state.polled_at = now;
                })
                .await;
            if updated.is_some() {
                return;
            }
            let state = ShardState {
                players: players.clone(),
                polled_at: now,
            };
            // fails only if another first poll raced us in; go round and update it
            if self.shards.insert_async(shard.key, state).await.is_ok() {
                return;
            }
        }
    }

    /// Copy of one shard's roster, sorted by monetary value.
    pub async fn get_shard(&self, shard: &Shard) -> Option<(Vec<OnlinePlayer>, i64)> {
        self.shards
            .read_async(&shard.key, |_, state| {
                let mut players = state.players.clone();
                players.sort_by(|a, b| b.monetary_value.total_cmp(&a.monetary_value).then_with(|| a.name.cmp(&b.name)));
                (players, state.polled_at)
            })
            .await
    }

    /// Player counts for every shard, polled or not.
    pub async fn summaries(&self) -> Vec<ShardSummary> {
        let mut out = Vec::new();
        for shard in Shard::all() {
            let state = self
                .shards
                .read_async(&shard.key, |_, state| (state.players.len(), state.polled_at))
                .await;
            out.push(ShardSummary {
                shard: shard.key.to_string(),
                region: shard.region,
                online: state.map_or(0, |(online, _)| online),
                polled_at: state.map(|(_, polled_at)| polled_at),
            });
        }
        out
    }
}

impl Default for OnlineRoster {
    fn default() -> Self {
        Self::new()
    }
}

fn carry_since(previous: &[OnlinePlayer], mut next: Vec<OnlinePlayer>) -> Vec<OnlinePlayer> {
    for player in &mut next {
        if let Some(prev) = previous.iter().find(|p| p.id == player.id) {
            player.since = prev.since;
        }
    }
    next
}
