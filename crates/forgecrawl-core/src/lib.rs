//! Forgecrawl Core - shared value objects for the crawler fleet controller
//!
//! This crate holds the types that travel between the state layer and the
//! HTTP dispatcher: crawl blocks, hoster descriptors, and tuning knobs.

pub mod block;
pub mod config;
pub mod hoster;

pub use block::{now_ts, Block};
pub use config::CrawlConfig;
pub use hoster::{Hoster, HosterType};
