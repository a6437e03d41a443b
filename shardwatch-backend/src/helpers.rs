use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as i64)
    .unwrap_or_default()
}

/// Compare two secrets by their SHA-256 digests; timing reveals neither
/// length nor prefix.
pub fn tokens_match(expected: &str, provided: &str) -> bool {
  Sha256::digest(expected.as_bytes()) == Sha256::digest(provided.as_bytes())
}
