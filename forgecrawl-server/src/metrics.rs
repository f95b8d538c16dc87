//! Prometheus metrics for dispatcher observability.

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use std::sync::Arc;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct HosterTypeLabel(pub String);

impl prometheus_client::encoding::EncodeLabelSet for HosterTypeLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("hoster_type", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct ControllerMetrics {
    pub blocks_issued: Family<HosterTypeLabel, Counter>,
    pub blocks_reissued: Family<HosterTypeLabel, Counter>,
    pub callbacks_received: Family<HosterTypeLabel, Counter>,
    pub runs_finished: Family<HosterTypeLabel, Counter>,
    pub repos_ingested: Counter,
    pub registry: Arc<Registry>,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let blocks_issued = Family::<HosterTypeLabel, Counter>::default();
        registry.register(
            "forgecrawl_blocks_issued",
            "Fresh blocks handed out to workers",
            blocks_issued.clone(),
        );

        let blocks_reissued = Family::<HosterTypeLabel, Counter>::default();
        registry.register(
            "forgecrawl_blocks_reissued",
            "Timed-out blocks handed out again",
            blocks_reissued.clone(),
        );

        let callbacks_received = Family::<HosterTypeLabel, Counter>::default();
        registry.register(
            "forgecrawl_callbacks_received",
            "Block callbacks received from workers",
            callbacks_received.clone(),
        );

        let runs_finished = Family::<HosterTypeLabel, Counter>::default();
        registry.register(
            "forgecrawl_runs_finished",
            "Crawl rounds declared over",
            runs_finished.clone(),
        );

        let repos_ingested = Counter::default();
        registry.register(
            "forgecrawl_repos_ingested",
            "Repository records written to the sink",
            repos_ingested.clone(),
        );

        Self {
            blocks_issued,
            blocks_reissued,
            callbacks_received,
            runs_finished,
            repos_ingested,
            registry: Arc::new(registry),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap();
        buf
    }
}
