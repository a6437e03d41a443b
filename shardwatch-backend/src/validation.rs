//! Input validation and coercion for all backend routes
use serde_json::Value;
use shardwatch_db::{MAX_BATCH_IDS, MAX_TZ_OFFSET_MINUTES, WindowClass, is_valid_player_id};
use thiserror::Error;

/// Largest poll accepted from a single shard
pub const MAX_POLL_PLAYERS: usize = 1000;

/// Longest administratively assigned real name
pub const MAX_REAL_NAME_CHARS: usize = 64;

/// 2100-01-01T00:00:00Z in milliseconds; later poll or join times are bogus
pub const MAX_PLAUSIBLE_TIMESTAMP: i64 = 4_102_444_800_000;

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Player id is not well-formed")]
    PlayerIdInvalid,

    #[error("Unknown shard '{0}' (expected us-1, us-5, us-20, eu-1, eu-5 or eu-20)")]
    UnknownShard(String),

    #[error("Poll too large (max {max} players, got {actual})")]
    PollTooLarge { max: usize, actual: usize },

    #[error("Real name cannot be empty")]
    RealNameEmpty,

    #[error("Real name too long (max 64 characters, got {0})")]
    RealNameTooLong(usize),
}

/// Validates a player id taken from a path segment
pub fn validate_player_id(id: &str) -> Result<(), ValidationError> {
    if !is_valid_player_id(id) {
        return Err(ValidationError::PlayerIdInvalid);
    }
    Ok(())
}

/// Validates the size of one shard poll
pub fn validate_poll_size(len: usize) -> Result<(), ValidationError> {
    if len > MAX_POLL_PLAYERS {
        return Err(ValidationError::PollTooLarge {
            max: MAX_POLL_PLAYERS,
            actual: len,
        });
    }
    Ok(())
}

/// Validates a real name and returns it trimmed
pub fn validate_real_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ValidationError::RealNameEmpty);
    }
    let len = name.chars().count();
    if len > MAX_REAL_NAME_CHARS {
        return Err(ValidationError::RealNameTooLong(len));
    }
    Ok(name.to_string())
}

/// Window class from loose client input; anything unrecognised is a day.
pub fn coerce_window(raw: Option<&str>) -> WindowClass {
    raw.and_then(|w| w.trim().parse().ok()).unwrap_or(WindowClass::Day)
}

/// Timezone offset in minutes from a number or numeric string; anything
/// else is UTC. Clamped to real-world offsets.
pub fn coerce_tz_offset(raw: Option<&Value>) -> i32 {
    let minutes = match raw {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    minutes
        .filter(|m| m.is_finite())
        .map(|m| {
            m.round()
                .clamp(-f64::from(MAX_TZ_OFFSET_MINUTES), f64::from(MAX_TZ_OFFSET_MINUTES)) as i32
        })
        .unwrap_or(0)
}

/// Whether a client-supplied millisecond timestamp lies between the epoch
/// and 2100.
pub fn is_plausible_timestamp(ts: i64) -> bool {
    (1..=MAX_PLAUSIBLE_TIMESTAMP).contains(&ts)
}

/// Batch ids from loose client input: non-strings are dropped and the list
/// is cut at the batch limit. Malformed strings are kept and later come back
/// as "never seen".
pub fn coerce_batch_ids(raw: &[Value]) -> Vec<String> {
    raw.iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .take(MAX_BATCH_IDS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_player_id_validation() {
        assert!(validate_player_id("did:privy:abc123").is_ok());
        assert_eq!(validate_player_id(""), Err(ValidationError::PlayerIdInvalid));
        assert_eq!(
            validate_player_id("a/b"),
            Err(ValidationError::PlayerIdInvalid)
        );
    }

    #[test]
    fn test_poll_size() {
        assert!(validate_poll_size(0).is_ok());
        assert!(validate_poll_size(1000).is_ok());
        assert_eq!(
            validate_poll_size(1001),
            Err(ValidationError::PollTooLarge {
                max: 1000,
                actual: 1001
            })
        );
    }

    #[test]
    fn test_real_name() {
        assert_eq!(validate_real_name("  Jane Doe "), Ok("Jane Doe".to_string()));
        assert_eq!(validate_real_name("   "), Err(ValidationError::RealNameEmpty));
        assert_eq!(
            validate_real_name(&"a".repeat(65)),
            Err(ValidationError::RealNameTooLong(65))
        );
    }

    #[test]
    fn test_plausible_timestamp() {
        assert!(is_plausible_timestamp(1_700_000_000_000));
        assert!(is_plausible_timestamp(MAX_PLAUSIBLE_TIMESTAMP));
        assert!(!is_plausible_timestamp(MAX_PLAUSIBLE_TIMESTAMP + 1));
        assert!(!is_plausible_timestamp(0));
        assert!(!is_plausible_timestamp(-1));
        assert!(!is_plausible_timestamp(i64::MIN));
        assert!(!is_plausible_timestamp(i64::MAX));
    }

    #[test]
    fn test_coerce_window() {
        assert_eq!(coerce_window(Some("1h")), WindowClass::Hour);
        assert_eq!(coerce_window(Some("1m")), WindowClass::Month);
        assert_eq!(coerce_window(Some("weekly")), WindowClass::Day);
        assert_eq!(coerce_window(None), WindowClass::Day);
    }

    #[test]
    fn test_coerce_tz_offset() {
        assert_eq!(coerce_tz_offset(Some(&json!(300))), 300);
        assert_eq!(coerce_tz_offset(Some(&json!("-330"))), -330);
        assert_eq!(coerce_tz_offset(Some(&json!(59.6))), 60);
        assert_eq!(coerce_tz_offset(Some(&json!(100000))), 840);
        assert_eq!(coerce_tz_offset(Some(&json!(-100000))), -840);
        assert_eq!(coerce_tz_offset(Some(&json!("abc"))), 0);
        assert_eq!(coerce_tz_offset(Some(&json!([1]))), 0);
        assert_eq!(coerce_tz_offset(None), 0);
    }

    #[test]
    fn test_coerce_batch_ids() {
        let raw = vec![json!("p1"), json!(42), json!(null), json!(" p2 "), json!({"id": "x"})];
        assert_eq!(coerce_batch_ids(&raw), vec!["p1".to_string(), "p2".to_string()]);

        let many: Vec<Value> = (0..75).map(|i| json!(format!("p{i}"))).collect();
        let ids = coerce_batch_ids(&many);
        assert_eq!(ids.len(), 50);
        assert_eq!(ids[49], "p49");
    }
}
