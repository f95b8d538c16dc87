//! Crawl block value object.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved block status tags. Not acted on by the controller yet; kept on
/// the wire for workers that already understand them.
pub const BLOCK_STATUS_FREE: &str = "free";
pub const BLOCK_STATUS_CRAWLING: &str = "crawling";

/// Current wall-clock time as fractional unix seconds.
pub fn now_ts() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// One unit of crawl work: a contiguous slice of a hoster's repo id space.
///
/// A block exists in the state store only while it is outstanding; a
/// confirmed callback removes it. `attempts_at` grows by one entry every
/// time the block is handed out, so its last element is always the most
/// recent issuance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub uid: String,
    /// Round that issued this block. Never changes after creation.
    pub run_uid: String,
    pub from_id: u64,
    pub to_id: u64,
    /// Explicit id list; supersedes the range when non-empty.
    #[serde(default)]
    pub ids: Vec<u64>,
    pub attempts_at: Vec<f64>,
    #[serde(default)]
    pub status: String,
}

impl Block {
    /// Create a fresh block covering `from_id..=to_id`, stamped with one
    /// issuance at `now`.
    pub fn new(run_uid: &str, from_id: u64, to_id: u64, now: f64) -> Self {
        Self {
            uid: Uuid::new_v4().simple().to_string(),
            run_uid: run_uid.to_string(),
            from_id,
            to_id,
            ids: Vec::new(),
            attempts_at: vec![now],
            status: String::new(),
        }
    }

    /// Time this block was last handed out.
    pub fn last_attempt_at(&self) -> f64 {
        self.attempts_at.last().copied().unwrap_or(0.0)
    }

    /// Highest repo id a callback for this block confirms: the last entry of
    /// the explicit id list when present, otherwise the range end.
    pub fn confirmed_repo_id(&self) -> u64 {
        self.ids.last().copied().unwrap_or(self.to_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_has_single_attempt() {
        let block = Block::new("run-1", 1, 1000, 42.5);
        assert_eq!(block.from_id, 1);
        assert_eq!(block.to_id, 1000);
        assert_eq!(block.attempts_at, vec![42.5]);
        assert_eq!(block.run_uid, "run-1");
        assert!(block.ids.is_empty());
        assert_eq!(block.status, "");
    }

    #[test]
    fn uids_are_unique_and_hex() {
        let a = Block::new("r", 1, 10, 0.0);
        let b = Block::new("r", 1, 10, 0.0);
        assert_ne!(a.uid, b.uid);
        assert_eq!(a.uid.len(), 32);
        assert!(a.uid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn json_roundtrip_is_lossless() {
        let mut block = Block::new("run-abc", 11, 20, 100.0);
        block.attempts_at.push(250.0);
        block.status = BLOCK_STATUS_CRAWLING.to_string();

        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn json_roundtrip_with_explicit_ids() {
        let mut block = Block::new("run-abc", 0, 0, 1.0);
        block.ids = vec![3, 7, 19];

        let json = serde_json::to_string(&block).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ids, vec![3, 7, 19]);
        assert_eq!(back, block);
    }

    #[test]
    fn missing_optional_fields_default() {
        let json = r#"{"uid":"u1","run_uid":"r1","from_id":1,"to_id":10,"attempts_at":[5.0]}"#;
        let block: Block = serde_json::from_str(json).unwrap();
        assert!(block.ids.is_empty());
        assert_eq!(block.status, "");
    }

    #[test]
    fn last_attempt_is_most_recent() {
        let mut block = Block::new("r", 1, 10, 10.0);
        block.attempts_at.push(20.0);
        block.attempts_at.push(30.0);
        assert_eq!(block.last_attempt_at(), 30.0);
    }

    #[test]
    fn confirmed_repo_id_prefers_explicit_ids() {
        let mut block = Block::new("r", 1, 1000, 0.0);
        assert_eq!(block.confirmed_repo_id(), 1000);
        block.ids = vec![4, 8, 15];
        assert_eq!(block.confirmed_repo_id(), 15);
    }
}
