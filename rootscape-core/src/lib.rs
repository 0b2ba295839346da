//! Aggregation engine for anycast root-server latency as seen from RIPE
//! Atlas probes.
//!
//! Thirteen feeds (one per root letter) are fetched concurrently by the
//! [`FeedCoordinator`]. Each `hostname.bind` answer is reduced to a site
//! code by the letter's extraction rule; matches land in the
//! [`ProbeStore`], everything else in the [`MismatchLedger`]. Renderers
//! combine a [`ProbeRecord`] with the current [`ViewState`] to get a
//! [`ProbeStyle`].

use std::time::{SystemTime, UNIX_EPOCH};

pub mod config;
pub mod error;
pub mod feed;
pub mod meta;
pub mod mismatch;
pub mod panel;
pub mod source;
pub mod store;
pub mod style;
pub mod view;

pub use config::Config;
pub use error::{ConfigError, FetchError, ViewError};
pub use feed::{
    parse_latest, Aggregator, AtlasApi, FeedCoordinator, FeedSample, LoadReport, MergeStats,
    PendingSet, LATEST_FIELDS,
};
pub use meta::{Memo, MetaCache, ProbeMeta};
pub use mismatch::{MismatchGroup, MismatchLedger};
pub use source::{extract, Source};
pub use store::{Observation, ProbeRecord, ProbeSnapshot, ProbeStore, SiteLatency};
pub use style::{ProbeStyle, StyleCache};
pub use view::{run_view_events, ViewEvent, ViewModel, ViewPatch, ViewState};

/// RIPE Atlas probe id.
pub type ProbeId = u32;

pub fn now_unix_ms() -> i64 {
    let dur = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (dur.as_secs() as i64) * 1000 + (dur.subsec_millis() as i64)
}
