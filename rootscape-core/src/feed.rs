use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::meta::ProbeMeta;
use crate::mismatch::MismatchLedger;
use crate::source::{extract, Source};
use crate::store::{Observation, ProbeStore};
use crate::ProbeId;

/// `fields` selector for the latest-results endpoint: round-trip time and
/// the first TXT string of the answer.
pub const LATEST_FIELDS: &str = "responses.0.response_time,responses.0.abuf.answers.0.data.0";

#[async_trait]
pub trait AtlasApi: Send + Sync {
    async fn latest(&self, source: Source) -> Result<Vec<FeedSample>, FetchError>;

    async fn probe(&self, probe: ProbeId) -> Result<ProbeMeta, FetchError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedSample {
    pub probe: ProbeId,
    pub ms: Option<f64>,
    pub identity: Option<String>,
}

// `{"<probe>": [[ms, identity]], ...}`; non-numeric probe keys are dropped.
pub fn parse_latest(body: &[u8]) -> Result<Vec<FeedSample>, FetchError> {
    let raw: BTreeMap<String, Value> = serde_json::from_slice(body)?;
    let mut out = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        let Ok(probe) = key.parse::<ProbeId>() else {
            debug!(key = %key, "skipping non-numeric probe key");
            continue;
        };
        let row = value
            .as_array()
            .and_then(|rows| rows.first())
            .and_then(Value::as_array);
        out.push(FeedSample {
            probe,
            ms: row.and_then(|r| r.first()).and_then(Value::as_f64),
            identity: row
                .and_then(|r| r.get(1))
                .and_then(Value::as_str)
                .map(str::to_string),
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSet {
    sources: BTreeSet<Source>,
}

impl PendingSet {
    pub fn all() -> Self {
        Self {
            sources: Source::ALL.into_iter().collect(),
        }
    }

    pub fn complete(&mut self, source: Source) -> bool {
        self.sources.remove(&source)
    }

    pub fn contains(&self, source: Source) -> bool {
        self.sources.contains(&source)
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Source> + '_ {
        self.sources.iter().copied()
    }

    pub fn progress_label(&self) -> String {
        let letters: Vec<String> = self.iter().map(|s| s.to_string()).collect();
        format!("Loading: {}", letters.join(" "))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub observations: usize,
    pub mismatches: usize,
    pub skipped: usize,
}

#[derive(Debug)]
pub struct Aggregator {
    store: ProbeStore,
    mismatches: MismatchLedger,
    pending: PendingSet,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            store: ProbeStore::new(),
            mismatches: MismatchLedger::new(),
            pending: PendingSet::all(),
        }
    }

    pub fn merge(&mut self, source: Source, samples: &[FeedSample]) -> MergeStats {
        let mut stats = MergeStats::default();
        for sample in samples {
            let (Some(identity), Some(ms)) = (sample.identity.as_deref(), sample.ms) else {
                stats.skipped += 1;
                continue;
            };
            match extract(source, identity) {
                Some(site) => {
                    self.store
                        .observe(sample.probe, Observation { source, site, ms });
                    stats.observations += 1;
                }
                None => {
                    self.mismatches
                        .record(sample.probe, source, &identity.to_lowercase());
                    stats.mismatches += 1;
                }
            }
        }
        stats
    }

    pub fn complete(&mut self, source: Source) {
        self.pending.complete(source);
    }

    pub fn store(&self) -> &ProbeStore {
        &self.store
    }

    pub fn mismatches(&self) -> &MismatchLedger {
        &self.mismatches
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<(Source, MergeStats)>,
    pub failed: Vec<(Source, FetchError)>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct FeedCoordinator<A> {
    api: Arc<A>,
    state: Mutex<Aggregator>,
    redraw: watch::Sender<u64>,
}

impl<A: AtlasApi> FeedCoordinator<A> {
    pub fn new(api: Arc<A>) -> Self {
        let (redraw, _) = watch::channel(0);
        Self {
            api,
            state: Mutex::new(Aggregator::new()),
            redraw,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.redraw.subscribe()
    }

    pub fn with_state<R>(&self, f: impl FnOnce(&Aggregator) -> R) -> R {
        f(&self.state.lock())
    }

    // On failure the letter stays pending and no redraw is signalled.
    pub async fn load_source(&self, source: Source) -> Result<MergeStats, FetchError> {
        let samples = self.api.latest(source).await.map_err(|err| {
            warn!(letter = %source, error = %err, "feed request failed");
            err
        })?;

        let stats = {
            let mut state = self.state.lock();
            let stats = state.merge(source, &samples);
            state.complete(source);
            debug!(progress = %state.pending().progress_label(), "feed merged");
            stats
        };
        info!(
            letter = %source,
            observations = stats.observations,
            mismatches = stats.mismatches,
            skipped = stats.skipped,
            "feed loaded"
        );
        self.redraw.send_modify(|generation| *generation += 1);
        Ok(stats)
    }

    pub async fn load_all(&self) -> LoadReport {
        let results = join_all(Source::ALL.map(|source| async move {
            (source, self.load_source(source).await)
        }))
        .await;

        let mut report = LoadReport::default();
        for (source, result) in results {
            match result {
                Ok(stats) => report.loaded.push((source, stats)),
                Err(err) => report.failed.push((source, err)),
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(probe: ProbeId, ms: Option<f64>, identity: Option<&str>) -> FeedSample {
        FeedSample {
            probe,
            ms,
            identity: identity.map(str::to_string),
        }
    }

    #[test]
    fn parses_latest_body() {
        let body = br#"{"100": [[12.3, "rootns-fra1"]], "7": [[4.5, null]], "x": [[1, "a"]], "9": []}"#;
        let samples = parse_latest(body).unwrap();
        assert_eq!(
            samples,
            vec![
                sample(100, Some(12.3), Some("rootns-fra1")),
                sample(7, Some(4.5), None),
                sample(9, None, None),
            ]
        );
    }

    #[test]
    fn non_object_body_is_a_decode_error() {
        assert!(matches!(parse_latest(b"[1,2,3]"), Err(FetchError::Decode(_))));
        assert!(matches!(parse_latest(b"<html>"), Err(FetchError::Decode(_))));
    }

    #[test]
    fn merge_routes_matches_and_mismatches() {
        let mut agg = Aggregator::new();
        let stats = agg.merge(
            Source::A,
            &[
                sample(100, Some(12.3), Some("rootns-fra1")),
                sample(101, Some(3.0), Some("Weird-Host")),
                sample(102, Some(3.0), None),
                sample(103, None, Some("rootns-lhr1")),
            ],
        );
        assert_eq!(
            stats,
            MergeStats {
                observations: 1,
                mismatches: 1,
                skipped: 2,
            }
        );
        assert_eq!(agg.store().len(), 1);
        let groups: Vec<_> = agg.mismatches().summarize().collect();
        assert_eq!(groups[0].hostname, "weird-host");
        assert_eq!(agg.pending().len(), 13);
        agg.complete(Source::A);
        assert!(!agg.pending().contains(Source::A));
    }

    #[test]
    fn progress_label_lists_pending_letters() {
        let mut pending = PendingSet::all();
        for source in Source::ALL.into_iter().skip(3) {
            pending.complete(source);
        }
        assert_eq!(pending.progress_label(), "Loading: A B C");
    }
}
