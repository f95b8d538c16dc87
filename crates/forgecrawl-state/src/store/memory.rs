//! In-memory state store.
//!
//! Single-process map behind one mutex; every trait method takes the lock
//! exactly once, so each operation is atomic. Used by tests and by the
//! server when no `DATABASE_URL` is configured.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use forgecrawl_core::Block;

use crate::error::StateError;
use crate::store::{RunStatus, StateStore};

#[derive(Debug, Default)]
struct HostState {
    blocks: HashMap<String, Block>,
    highest_block_repo_id: u64,
    highest_confirmed_repo_id: u64,
    empty_results_counter: u64,
    run_uid: Option<String>,
    run_created_ts: f64,
    run_is_finished: bool,
}

#[derive(Default)]
pub struct MemoryStateStore {
    hosts: Mutex<HashMap<String, HostState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_host<T>(&self, hoster_prefix: &str, f: impl FnOnce(&mut HostState) -> T) -> T {
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        let host = hosts.entry(hoster_prefix.to_string()).or_default();
        f(host)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_highest_block_repo_id(&self, hoster_prefix: &str) -> Result<u64, StateError> {
        Ok(self.with_host(hoster_prefix, |h| h.highest_block_repo_id))
    }

    async fn set_highest_block_repo_id(
        &self,
        hoster_prefix: &str,
        repo_id: u64,
    ) -> Result<(), StateError> {
        self.with_host(hoster_prefix, |h| h.highest_block_repo_id = repo_id);
        Ok(())
    }

    async fn get_highest_confirmed_repo_id(
        &self,
        hoster_prefix: &str,
    ) -> Result<u64, StateError> {
        Ok(self.with_host(hoster_prefix, |h| h.highest_confirmed_repo_id))
    }

    async fn set_highest_confirmed_repo_id(
        &self,
        hoster_prefix: &str,
        repo_id: u64,
    ) -> Result<(), StateError> {
        self.with_host(hoster_prefix, |h| h.highest_confirmed_repo_id = repo_id);
        Ok(())
    }

    async fn get_empty_results_counter(&self, hoster_prefix: &str) -> Result<u64, StateError> {
        Ok(self.with_host(hoster_prefix, |h| h.empty_results_counter))
    }

    async fn set_empty_results_counter(
        &self,
        hoster_prefix: &str,
        count: u64,
    ) -> Result<(), StateError> {
        self.with_host(hoster_prefix, |h| h.empty_results_counter = count);
        Ok(())
    }

    async fn increment_empty_results_counter(
        &self,
        hoster_prefix: &str,
        amount: u64,
    ) -> Result<u64, StateError> {
        Ok(self.with_host(hoster_prefix, |h| {
            h.empty_results_counter += amount;
            h.empty_results_counter
        }))
    }

    async fn push_block(&self, hoster_prefix: &str, block: &Block) -> Result<(), StateError> {
        self.with_host(hoster_prefix, |h| {
            h.blocks.insert(block.uid.clone(), block.clone())
        });
        Ok(())
    }

    async fn get_block(
        &self,
        hoster_prefix: &str,
        block_uid: &str,
    ) -> Result<Option<Block>, StateError> {
        Ok(self.with_host(hoster_prefix, |h| h.blocks.get(block_uid).cloned()))
    }

    async fn delete_block(
        &self,
        hoster_prefix: &str,
        block_uid: &str,
    ) -> Result<Option<Block>, StateError> {
        Ok(self.with_host(hoster_prefix, |h| h.blocks.remove(block_uid)))
    }

    async fn get_blocks(&self, hoster_prefix: &str) -> Result<Vec<Block>, StateError> {
        Ok(self.with_host(hoster_prefix, |h| h.blocks.values().cloned().collect()))
    }

    async fn delete_blocks(&self, hoster_prefix: &str) -> Result<(), StateError> {
        self.with_host(hoster_prefix, |h| h.blocks.clear());
        Ok(())
    }

    async fn get_run_uid(&self, hoster_prefix: &str) -> Result<Option<String>, StateError> {
        Ok(self.with_host(hoster_prefix, |h| h.run_uid.clone()))
    }

    async fn set_run_uid(&self, hoster_prefix: &str, run_uid: &str) -> Result<(), StateError> {
        self.with_host(hoster_prefix, |h| h.run_uid = Some(run_uid.to_string()));
        Ok(())
    }

    async fn get_run_created_ts(&self, hoster_prefix: &str) -> Result<f64, StateError> {
        Ok(self.with_host(hoster_prefix, |h| h.run_created_ts))
    }

    async fn set_run_created_ts(&self, hoster_prefix: &str, ts: f64) -> Result<(), StateError> {
        self.with_host(hoster_prefix, |h| h.run_created_ts = ts);
        Ok(())
    }

    async fn get_run_is_finished(&self, hoster_prefix: &str) -> Result<bool, StateError> {
        Ok(self.with_host(hoster_prefix, |h| h.run_is_finished))
    }

    async fn set_run_is_finished(
        &self,
        hoster_prefix: &str,
        finished: bool,
    ) -> Result<(), StateError> {
        self.with_host(hoster_prefix, |h| h.run_is_finished = finished);
        Ok(())
    }

    async fn get_run_status(&self, hoster_prefix: &str) -> Result<RunStatus, StateError> {
        Ok(self.with_host(hoster_prefix, |h| RunStatus {
            highest_block_repo_id: h.highest_block_repo_id,
            highest_confirmed_repo_id: h.highest_confirmed_repo_id,
            empty_results_counter: h.empty_results_counter,
            run_uid: h.run_uid.clone(),
            run_created_ts: h.run_created_ts,
            run_is_finished: h.run_is_finished,
        }))
    }
}
