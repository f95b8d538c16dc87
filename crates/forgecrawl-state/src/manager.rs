//! Policy-free state operations: block issuance, timeout recovery, run
//! bookkeeping.
//!
//! The manager serializes compound read-modify-write sequences per hoster
//! with an async mutex table, on top of individually-atomic store
//! operations. Between reading `highest_block_repo_id` and writing back the
//! issued `to_id`, no other issuer for the same hoster can run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use forgecrawl_core::{now_ts, Block, CrawlConfig};

use crate::error::StateError;
use crate::store::{RunStatus, StateStore};

pub struct StateManager {
    store: Arc<dyn StateStore>,
    config: CrawlConfig,
    hoster_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StateManager {
    pub fn new(store: Arc<dyn StateStore>, config: CrawlConfig) -> Self {
        Self {
            store,
            config,
            hoster_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn batch_size(&self) -> u64 {
        self.config.batch_size
    }

    pub fn block_timeout(&self) -> f64 {
        self.config.block_timeout
    }

    pub fn empty_results_max(&self) -> u64 {
        self.config.empty_results_max
    }

    fn hoster_lock(&self, hoster_prefix: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.hoster_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(hoster_prefix.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Rotate to a fresh run: new `run_uid`, zeroed counters, outstanding
    /// blocks discarded. Callers must hold the hoster lock.
    async fn start_new_run(&self, hoster_prefix: &str, now: f64) -> Result<String, StateError> {
        let run_uid = Uuid::new_v4().simple().to_string();
        self.store.set_run_uid(hoster_prefix, &run_uid).await?;
        self.store.set_highest_block_repo_id(hoster_prefix, 0).await?;
        self.store
            .set_highest_confirmed_repo_id(hoster_prefix, 0)
            .await?;
        self.store.set_empty_results_counter(hoster_prefix, 0).await?;
        self.store.delete_blocks(hoster_prefix).await?;
        self.store.set_run_created_ts(hoster_prefix, now).await?;
        self.store.set_run_is_finished(hoster_prefix, false).await?;
        info!("started run {} for hoster {}", run_uid, hoster_prefix);
        Ok(run_uid)
    }

    /// Issue the next fresh block for this hoster, starting a new run first
    /// when none exists yet or the previous one was declared over.
    pub async fn get_next_block(&self, hoster_prefix: &str) -> Result<Block, StateError> {
        let lock = self.hoster_lock(hoster_prefix);
        let _guard = lock.lock().await;

        let now = now_ts();
        let current_run = self.store.get_run_uid(hoster_prefix).await?;
        let run_is_finished = self.store.get_run_is_finished(hoster_prefix).await?;
        let run_uid = match current_run {
            Some(uid) if !run_is_finished => uid,
            _ => self.start_new_run(hoster_prefix, now).await?,
        };

        let highest = self.store.get_highest_block_repo_id(hoster_prefix).await?;
        let block = Block::new(&run_uid, highest + 1, highest + self.config.batch_size, now);
        self.store.push_block(hoster_prefix, &block).await?;
        self.store
            .set_highest_block_repo_id(hoster_prefix, block.to_id)
            .await?;
        debug!(
            "issued block {} ({}..{}) for hoster {}",
            block.uid, block.from_id, block.to_id, hoster_prefix
        );
        Ok(block)
    }

    /// Return an outstanding block whose last issuance is older than the
    /// block timeout, if any, stamping a fresh attempt on it so concurrent
    /// requesters do not all receive the same block.
    ///
    /// `timestamp_now` overrides the wall clock, for tests.
    pub async fn get_timed_out_block(
        &self,
        hoster_prefix: &str,
        timestamp_now: Option<f64>,
    ) -> Result<Option<Block>, StateError> {
        let lock = self.hoster_lock(hoster_prefix);
        let _guard = lock.lock().await;

        let now = timestamp_now.unwrap_or_else(now_ts);
        for mut block in self.store.get_blocks(hoster_prefix).await? {
            if now - block.last_attempt_at() > self.config.block_timeout {
                block.attempts_at.push(now);
                self.store.push_block(hoster_prefix, &block).await?;
                info!(
                    "re-issuing timed out block {} for hoster {} (attempt {})",
                    block.uid,
                    hoster_prefix,
                    block.attempts_at.len()
                );
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    pub async fn get_block(
        &self,
        hoster_prefix: &str,
        block_uid: &str,
    ) -> Result<Option<Block>, StateError> {
        self.store.get_block(hoster_prefix, block_uid).await
    }

    pub async fn get_blocks(&self, hoster_prefix: &str) -> Result<Vec<Block>, StateError> {
        self.store.get_blocks(hoster_prefix).await
    }

    /// Remove a confirmed block. Returns `None` when it was already gone.
    pub async fn finish_block(
        &self,
        hoster_prefix: &str,
        block_uid: &str,
    ) -> Result<Option<Block>, StateError> {
        self.store.delete_block(hoster_prefix, block_uid).await
    }

    /// Declare the current round over. Outstanding blocks stay in place and
    /// are discarded lazily by the next `get_next_block`.
    pub async fn finish_run(&self, hoster_prefix: &str) -> Result<(), StateError> {
        self.store.set_run_is_finished(hoster_prefix, true).await?;
        info!("run finished for hoster {}", hoster_prefix);
        Ok(())
    }

    /// Force a fresh run right now, discarding all outstanding work.
    pub async fn reset(&self, hoster_prefix: &str) -> Result<(), StateError> {
        let lock = self.hoster_lock(hoster_prefix);
        let _guard = lock.lock().await;
        self.start_new_run(hoster_prefix, now_ts()).await?;
        Ok(())
    }

    /// Snapshot the hoster's run counters, creating the per-hoster state on
    /// first access.
    pub async fn get_state_dict(&self, hoster_prefix: &str) -> Result<RunStatus, StateError> {
        let lock = self.hoster_lock(hoster_prefix);
        let _guard = lock.lock().await;

        if self.store.get_run_uid(hoster_prefix).await?.is_none() {
            self.start_new_run(hoster_prefix, now_ts()).await?;
        }
        self.store.get_run_status(hoster_prefix).await
    }

    pub async fn get_run_is_finished(&self, hoster_prefix: &str) -> Result<bool, StateError> {
        self.store.get_run_is_finished(hoster_prefix).await
    }

    pub async fn get_highest_confirmed_repo_id(
        &self,
        hoster_prefix: &str,
    ) -> Result<u64, StateError> {
        self.store.get_highest_confirmed_repo_id(hoster_prefix).await
    }

    /// Advance the confirmed-id watermark. It only ever increases within a
    /// run; a lower value is ignored.
    pub async fn set_highest_confirmed_repo_id(
        &self,
        hoster_prefix: &str,
        repo_id: u64,
    ) -> Result<(), StateError> {
        let current = self.store.get_highest_confirmed_repo_id(hoster_prefix).await?;
        if repo_id > current {
            self.store
                .set_highest_confirmed_repo_id(hoster_prefix, repo_id)
                .await?;
        }
        Ok(())
    }

    pub async fn get_empty_results_counter(&self, hoster_prefix: &str) -> Result<u64, StateError> {
        self.store.get_empty_results_counter(hoster_prefix).await
    }

    pub async fn increment_empty_results_counter(
        &self,
        hoster_prefix: &str,
        amount: u64,
    ) -> Result<u64, StateError> {
        self.store
            .increment_empty_results_counter(hoster_prefix, amount)
            .await
    }

    pub async fn clear_empty_results_counter(&self, hoster_prefix: &str) -> Result<(), StateError> {
        self.store.set_empty_results_counter(hoster_prefix, 0).await
    }
}
