//! Per-hoster-type run-finish policies.
//!
//! A callback for a block answers one question: is this hoster's round now
//! over? The answer depends on how the hoster serves repositories.
//! Paginated APIs (Gitea, GitLab) stop returning results exactly at the end
//! of their listing, so an empty block directly after the last confirmed one
//! terminates the round. GitHub's id space is riddled with holes (private,
//! deleted, suspended repos), so emptiness means nothing there and only a
//! long streak of consecutive empty callbacks ends the round.

use std::sync::Arc;

use tracing::info;

use forgecrawl_core::{Block, HosterType};

use crate::error::StateError;
use crate::manager::StateManager;

/// How a hoster type signals the end of its repo listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPolicy {
    /// Results come from a paginated listing; an empty page at the frontier
    /// is a real end.
    Paginated,
    /// Blocks scan a sparse id space; emptiness is never a terminator.
    IdScanned,
}

impl RunPolicy {
    pub fn for_hoster_type(kind: HosterType) -> Self {
        match kind {
            HosterType::Github => RunPolicy::IdScanned,
            HosterType::Gitea | HosterType::Gitlab => RunPolicy::Paginated,
        }
    }

    /// `highest_confirmed_repo_id` is read before this block advances it,
    /// so the frontier test compares against the previous confirmed id.
    fn has_reached_end(
        &self,
        block: &Block,
        results_empty: bool,
        highest_confirmed_repo_id: u64,
        batch_size: u64,
    ) -> bool {
        match self {
            RunPolicy::IdScanned => false,
            RunPolicy::Paginated => {
                results_empty && block.to_id == highest_confirmed_repo_id + batch_size
            }
        }
    }
}

/// Applies a block callback to the hoster's run state.
pub struct RunResolver {
    manager: Arc<StateManager>,
}

impl RunResolver {
    pub fn new(manager: Arc<StateManager>) -> Self {
        Self { manager }
    }

    /// Resolve a worker callback for `block_uid` carrying `parsed_repos`.
    ///
    /// Returns `Some(true)` when this callback finished the round,
    /// `Some(false)` when the round keeps going, and `None` when the
    /// callback did not apply (block already gone, or its run already
    /// closed) and no state was touched.
    pub async fn resolve_state(
        &self,
        hoster_prefix: &str,
        hoster_type: HosterType,
        block_uid: &str,
        parsed_repos: &[serde_json::Value],
    ) -> Result<Option<bool>, StateError> {
        let Some(block) = self.manager.get_block(hoster_prefix, block_uid).await? else {
            info!("block no longer exists - no state changes, uid: {block_uid}");
            return Ok(None);
        };
        if self.manager.get_run_is_finished(hoster_prefix).await? {
            info!("skipping state update for outdated block, uid: {block_uid}");
            return Ok(None);
        }

        self.manager.finish_block(hoster_prefix, block_uid).await?;
        if parsed_repos.is_empty() {
            self.manager
                .increment_empty_results_counter(hoster_prefix, 1)
                .await?;
        } else {
            self.manager.clear_empty_results_counter(hoster_prefix).await?;
        }

        let policy = RunPolicy::for_hoster_type(hoster_type);
        let highest_confirmed = self
            .manager
            .get_highest_confirmed_repo_id(hoster_prefix)
            .await?;
        let has_reached_end = policy.has_reached_end(
            &block,
            parsed_repos.is_empty(),
            highest_confirmed,
            self.manager.batch_size(),
        );
        let has_too_many_empty = self.manager.get_empty_results_counter(hoster_prefix).await?
            >= self.manager.empty_results_max();

        if has_reached_end {
            info!("crawler reached end for hoster {hoster_prefix}");
            self.manager.finish_run(hoster_prefix).await?;
        } else if has_too_many_empty {
            info!("crawler reached max empty results for hoster {hoster_prefix}");
            self.manager.finish_run(hoster_prefix).await?;
        } else {
            self.manager
                .set_highest_confirmed_repo_id(hoster_prefix, block.confirmed_repo_id())
                .await?;
        }

        Ok(Some(self.manager.get_run_is_finished(hoster_prefix).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStateStore, StateStore};
    use forgecrawl_core::CrawlConfig;

    fn setup(config: CrawlConfig) -> (Arc<StateManager>, RunResolver) {
        let manager = Arc::new(StateManager::new(
            Arc::new(MemoryStateStore::new()),
            config,
        ));
        let resolver = RunResolver::new(manager.clone());
        (manager, resolver)
    }

    fn repos(n: usize) -> Vec<serde_json::Value> {
        (0..n)
            .map(|i| serde_json::json!({"id": i + 1, "name": format!("repo-{i}")}))
            .collect()
    }

    #[test]
    fn policy_per_hoster_type() {
        assert_eq!(
            RunPolicy::for_hoster_type(HosterType::Github),
            RunPolicy::IdScanned
        );
        assert_eq!(
            RunPolicy::for_hoster_type(HosterType::Gitea),
            RunPolicy::Paginated
        );
        assert_eq!(
            RunPolicy::for_hoster_type(HosterType::Gitlab),
            RunPolicy::Paginated
        );
    }

    #[tokio::test]
    async fn gitea_end_of_pagination() {
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            ..CrawlConfig::default()
        });

        let a = manager.get_next_block("1").await.unwrap();
        let finished = resolver
            .resolve_state("1", HosterType::Gitea, &a.uid, &repos(10))
            .await
            .unwrap();
        assert_eq!(finished, Some(false));
        assert_eq!(manager.get_highest_confirmed_repo_id("1").await.unwrap(), 10);

        let b = manager.get_next_block("1").await.unwrap();
        assert_eq!((b.from_id, b.to_id), (11, 20));
        let finished = resolver
            .resolve_state("1", HosterType::Gitea, &b.uid, &repos(0))
            .await
            .unwrap();
        assert_eq!(finished, Some(true));
        assert!(manager.get_run_is_finished("1").await.unwrap());

        // the next request rolls over into a fresh round
        let c = manager.get_next_block("1").await.unwrap();
        assert_eq!((c.from_id, c.to_id), (1, 10));
        assert_ne!(c.run_uid, a.run_uid);
    }

    #[tokio::test]
    async fn gitea_end_after_longer_run() {
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            ..CrawlConfig::default()
        });

        let a = manager.get_next_block("1").await.unwrap();
        let b = manager.get_next_block("1").await.unwrap();
        resolver
            .resolve_state("1", HosterType::Gitea, &a.uid, &repos(10))
            .await
            .unwrap();
        resolver
            .resolve_state("1", HosterType::Gitea, &b.uid, &repos(10))
            .await
            .unwrap();
        assert_eq!(manager.get_highest_confirmed_repo_id("1").await.unwrap(), 20);

        let c = manager.get_next_block("1").await.unwrap();
        let finished = resolver
            .resolve_state("1", HosterType::Gitea, &c.uid, &repos(0))
            .await
            .unwrap();
        assert_eq!(finished, Some(true));
    }

    #[tokio::test]
    async fn gitea_empty_block_past_the_frontier_is_not_an_end() {
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            ..CrawlConfig::default()
        });

        let a = manager.get_next_block("1").await.unwrap();
        let b = manager.get_next_block("1").await.unwrap();

        // b's empty callback arrives first: to_id 20 != 0 + 10, so this is a
        // hole, not the end of pagination
        let finished = resolver
            .resolve_state("1", HosterType::Gitea, &b.uid, &repos(0))
            .await
            .unwrap();
        assert_eq!(finished, Some(false));
        assert_eq!(manager.get_empty_results_counter("1").await.unwrap(), 1);

        // a's results then land and clear the empty streak
        let finished = resolver
            .resolve_state("1", HosterType::Gitea, &a.uid, &repos(10))
            .await
            .unwrap();
        assert_eq!(finished, Some(false));
        assert_eq!(manager.get_empty_results_counter("1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn gitea_nonempty_result_never_ends_the_run() {
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            ..CrawlConfig::default()
        });

        let a = manager.get_next_block("1").await.unwrap();
        let finished = resolver
            .resolve_state("1", HosterType::Gitea, &a.uid, &repos(3))
            .await
            .unwrap();
        assert_eq!(finished, Some(false));
    }

    #[tokio::test]
    async fn github_finishes_on_consecutive_empties() {
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            empty_results_max: 3,
            ..CrawlConfig::default()
        });

        for expected in [Some(false), Some(false)] {
            let block = manager.get_next_block("1").await.unwrap();
            let finished = resolver
                .resolve_state("1", HosterType::Github, &block.uid, &repos(0))
                .await
                .unwrap();
            assert_eq!(finished, expected);
        }

        let block = manager.get_next_block("1").await.unwrap();
        let finished = resolver
            .resolve_state("1", HosterType::Github, &block.uid, &repos(0))
            .await
            .unwrap();
        assert_eq!(finished, Some(true));
    }

    #[tokio::test]
    async fn github_nonempty_resets_the_streak() {
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            empty_results_max: 3,
            ..CrawlConfig::default()
        });

        for _ in 0..2 {
            let block = manager.get_next_block("1").await.unwrap();
            resolver
                .resolve_state("1", HosterType::Github, &block.uid, &repos(0))
                .await
                .unwrap();
        }
        let block = manager.get_next_block("1").await.unwrap();
        resolver
            .resolve_state("1", HosterType::Github, &block.uid, &repos(5))
            .await
            .unwrap();
        assert_eq!(manager.get_empty_results_counter("1").await.unwrap(), 0);

        // two more empties are again below the limit
        for _ in 0..2 {
            let block = manager.get_next_block("1").await.unwrap();
            let finished = resolver
                .resolve_state("1", HosterType::Github, &block.uid, &repos(0))
                .await
                .unwrap();
            assert_eq!(finished, Some(false));
        }
    }

    #[tokio::test]
    async fn github_empty_block_never_pages_out() {
        // an empty github block at the exact pagination frontier still does
        // not end the run
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            ..CrawlConfig::default()
        });

        let a = manager.get_next_block("1").await.unwrap();
        resolver
            .resolve_state("1", HosterType::Github, &a.uid, &repos(10))
            .await
            .unwrap();
        let b = manager.get_next_block("1").await.unwrap();
        let finished = resolver
            .resolve_state("1", HosterType::Github, &b.uid, &repos(0))
            .await
            .unwrap();
        assert_eq!(finished, Some(false));
    }

    #[tokio::test]
    async fn stale_callback_after_reset_changes_nothing() {
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            ..CrawlConfig::default()
        });

        let a = manager.get_next_block("1").await.unwrap();
        manager.reset("1").await.unwrap();

        let outcome = resolver
            .resolve_state("1", HosterType::Gitea, &a.uid, &repos(10))
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert!(manager.get_blocks("1").await.unwrap().is_empty());
        assert_eq!(manager.get_highest_confirmed_repo_id("1").await.unwrap(), 0);
        assert_eq!(manager.get_empty_results_counter("1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_callback_for_finished_block_changes_nothing() {
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            ..CrawlConfig::default()
        });

        let a = manager.get_next_block("1").await.unwrap();
        resolver
            .resolve_state("1", HosterType::Gitea, &a.uid, &repos(10))
            .await
            .unwrap();

        // the worker retries the same callback; the block is already gone
        let before = manager.get_state_dict("1").await.unwrap();
        let outcome = resolver
            .resolve_state("1", HosterType::Gitea, &a.uid, &repos(10))
            .await
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(manager.get_state_dict("1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn outstanding_block_of_closed_run_is_skipped_not_resolved() {
        let (manager, resolver) = setup(CrawlConfig {
            batch_size: 10,
            empty_results_max: 1,
            ..CrawlConfig::default()
        });

        // two blocks outstanding; the first empty callback closes the run
        let a = manager.get_next_block("1").await.unwrap();
        let b = manager.get_next_block("1").await.unwrap();
        resolver
            .resolve_state("1", HosterType::Github, &a.uid, &repos(0))
            .await
            .unwrap();
        assert!(manager.get_run_is_finished("1").await.unwrap());

        // b still exists in the store but belongs to the closed round
        let before = manager.get_state_dict("1").await.unwrap();
        let outcome = resolver
            .resolve_state("1", HosterType::Github, &b.uid, &repos(7))
            .await
            .unwrap();
        assert_eq!(outcome, None);
        let after = manager.get_state_dict("1").await.unwrap();
        assert_eq!(before, after);
        // the block itself is left for the lazy discard at rollover
        assert!(manager.get_block("1", &b.uid).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn explicit_id_list_confirms_its_last_id() {
        let store = Arc::new(MemoryStateStore::new());
        let manager = Arc::new(StateManager::new(
            store.clone(),
            CrawlConfig {
                batch_size: 10,
                ..CrawlConfig::default()
            },
        ));
        let resolver = RunResolver::new(manager.clone());

        // issue a block under the current run, then swap in an explicit id
        // list as an id-carrying issuer would have
        let mut a = manager.get_next_block("1").await.unwrap();
        a.ids = vec![2, 5, 9];
        store.push_block("1", &a).await.unwrap();

        let finished = resolver
            .resolve_state("1", HosterType::Gitea, &a.uid, &repos(3))
            .await
            .unwrap();
        assert_eq!(finished, Some(false));
        assert_eq!(manager.get_highest_confirmed_repo_id("1").await.unwrap(), 9);
    }
}
