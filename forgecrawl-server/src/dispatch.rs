//! Block issuance and cross-hoster load-balancing decisions.

use serde::{Deserialize, Serialize};
use url::Url;

use forgecrawl_core::config::LOADBALANCE_MAX_AGE_SECS;
use forgecrawl_core::{Block, Hoster};
use forgecrawl_state::{RunStatus, StateManager};

use crate::metrics::{ControllerMetrics, HosterTypeLabel};

/// Block as handed to a worker: the raw block plus the hoster descriptor
/// and the callback URL the parsed results go to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResponse {
    #[serde(flatten)]
    pub block: Block,
    pub crawler: Hoster,
    pub callback_url: String,
}

/// Hand out work for one hoster: a timed-out block when one exists, else
/// the next fresh one. Retries always drain first.
pub async fn issue_block(
    manager: &StateManager,
    metrics: &ControllerMetrics,
    external_url: &Url,
    hoster: &Hoster,
) -> anyhow::Result<BlockResponse> {
    let prefix = hoster.prefix();
    let (block, reissued) = match manager.get_timed_out_block(&prefix, None).await? {
        Some(block) => (block, true),
        None => (manager.get_next_block(&prefix).await?, false),
    };

    let label = HosterTypeLabel(hoster.kind.to_string());
    if reissued {
        metrics.blocks_reissued.get_or_create(&label).inc();
    } else {
        metrics.blocks_issued.get_or_create(&label).inc();
    }

    let callback_url =
        external_url.join(&format!("hosters/{}/{}", hoster.id, block.uid))?;

    Ok(BlockResponse {
        block,
        crawler: hoster.clone(),
        callback_url: callback_url.to_string(),
    })
}

/// Pick the hoster whose current round is the stalest among the crawlable
/// ones: rounds still running, or finished longer than an hour ago. Returns
/// `None` when nothing is due.
pub fn pick_stalest_crawlable(states: &[(i64, RunStatus)], now: f64) -> Option<i64> {
    let cutoff = now - LOADBALANCE_MAX_AGE_SECS;
    states
        .iter()
        .filter(|(_, status)| !status.run_is_finished || status.run_created_ts < cutoff)
        .min_by(|(_, a), (_, b)| a.run_created_ts.total_cmp(&b.run_created_ts))
        .map(|(id, _)| *id)
}
