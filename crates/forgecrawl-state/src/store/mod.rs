//! Backing store for per-hoster crawl state.
//!
//! The store is a keyed map from `(hoster_prefix, field)` to value, with
//! sub-map access for outstanding blocks. It is the only place concurrent
//! workers race: every trait method must be individually atomic. Compound
//! sequences (issue a block, start a run) are serialized one level up by
//! [`StateManager`](crate::StateManager).
//!
//! Two interchangeable implementations:
//!
//! - [`MemoryStateStore`] -- single-process map, used by tests and
//!   persistence-free deployments.
//! - [`PostgresStateStore`] -- shared store for production, one SQL
//!   statement per operation.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use forgecrawl_core::Block;

use crate::error::StateError;

pub use memory::MemoryStateStore;
pub use postgres::PostgresStateStore;

/// Snapshot of one hoster's run counters, as served by `GET state` and
/// consumed by load-balanced dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub highest_block_repo_id: u64,
    pub highest_confirmed_repo_id: u64,
    pub empty_results_counter: u64,
    pub run_uid: Option<String>,
    pub run_created_ts: f64,
    pub run_is_finished: bool,
}

/// Keyed state store, consumed as `Arc<dyn StateStore>`.
///
/// Reads on a hoster that was never written return the zero value (0 for
/// counters, empty list for blocks, `None` for the run uid) rather than an
/// error. Writes create the hoster row implicitly.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get_highest_block_repo_id(&self, hoster_prefix: &str) -> Result<u64, StateError>;
    async fn set_highest_block_repo_id(
        &self,
        hoster_prefix: &str,
        repo_id: u64,
    ) -> Result<(), StateError>;

    async fn get_highest_confirmed_repo_id(&self, hoster_prefix: &str)
        -> Result<u64, StateError>;
    async fn set_highest_confirmed_repo_id(
        &self,
        hoster_prefix: &str,
        repo_id: u64,
    ) -> Result<(), StateError>;

    async fn get_empty_results_counter(&self, hoster_prefix: &str) -> Result<u64, StateError>;
    async fn set_empty_results_counter(
        &self,
        hoster_prefix: &str,
        count: u64,
    ) -> Result<(), StateError>;
    /// Atomically add `amount` and return the new value.
    async fn increment_empty_results_counter(
        &self,
        hoster_prefix: &str,
        amount: u64,
    ) -> Result<u64, StateError>;

    /// Insert a block, replacing any existing block with the same uid.
    /// Also used to write back a refreshed `attempts_at` list.
    async fn push_block(&self, hoster_prefix: &str, block: &Block) -> Result<(), StateError>;
    async fn get_block(
        &self,
        hoster_prefix: &str,
        block_uid: &str,
    ) -> Result<Option<Block>, StateError>;
    /// Remove and return; `None` when the block is already gone.
    async fn delete_block(
        &self,
        hoster_prefix: &str,
        block_uid: &str,
    ) -> Result<Option<Block>, StateError>;
    async fn get_blocks(&self, hoster_prefix: &str) -> Result<Vec<Block>, StateError>;
    async fn delete_blocks(&self, hoster_prefix: &str) -> Result<(), StateError>;

    async fn get_run_uid(&self, hoster_prefix: &str) -> Result<Option<String>, StateError>;
    async fn set_run_uid(&self, hoster_prefix: &str, run_uid: &str) -> Result<(), StateError>;

    async fn get_run_created_ts(&self, hoster_prefix: &str) -> Result<f64, StateError>;
    async fn set_run_created_ts(&self, hoster_prefix: &str, ts: f64) -> Result<(), StateError>;

    async fn get_run_is_finished(&self, hoster_prefix: &str) -> Result<bool, StateError>;
    async fn set_run_is_finished(
        &self,
        hoster_prefix: &str,
        finished: bool,
    ) -> Result<(), StateError>;

    /// One-shot snapshot of the scalar state (not the blocks).
    async fn get_run_status(&self, hoster_prefix: &str) -> Result<RunStatus, StateError>;
}
