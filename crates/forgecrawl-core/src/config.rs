//! Crawl tuning knobs shared by the state manager, resolver, and dispatcher.

use serde::{Deserialize, Serialize};

pub const DEFAULT_BATCH_SIZE: u64 = 1000;
pub const DEFAULT_BLOCK_TIMEOUT_SECS: f64 = 1000.0;
pub const DEFAULT_EMPTY_RESULTS_MAX: u64 = 100;

/// A hoster whose round finished longer ago than this is considered idle and
/// becomes eligible for load-balanced dispatch again.
pub const LOADBALANCE_MAX_AGE_SECS: f64 = 3600.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Width of each issued block in repo ids.
    pub batch_size: u64,
    /// Seconds after the last issuance before a block is considered lost.
    pub block_timeout: f64,
    /// Consecutive empty callbacks before a run is declared over.
    pub empty_results_max: u64,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            block_timeout: DEFAULT_BLOCK_TIMEOUT_SECS,
            empty_results_max: DEFAULT_EMPTY_RESULTS_MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_worker_contract() {
        let config = CrawlConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.block_timeout, 1000.0);
        assert_eq!(config.empty_results_max, 100);
        assert_eq!(LOADBALANCE_MAX_AGE_SECS, 3600.0);
    }
}
