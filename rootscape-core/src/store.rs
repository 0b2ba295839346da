//! Per-probe accumulation of observations and the K-th fastest ranking.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::source::Source;
use crate::ProbeId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub source: Source,
    pub site: String,
    pub ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SiteLatency {
    pub site: String,
    pub ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeRecord {
    detail: IndexMap<Source, SiteLatency>,
    fastest: Option<Observation>,
}

impl ProbeRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a record by replaying observations in order.
    pub fn from_observations<I>(observations: I) -> Self
    where
        I: IntoIterator<Item = Observation>,
    {
        let mut record = Self::new();
        for obs in observations {
            record.observe(obs);
        }
        record
    }

    pub fn observe(&mut self, obs: Observation) {
        self.detail.insert(
            obs.source,
            SiteLatency {
                site: obs.site.clone(),
                ms: obs.ms,
            },
        );

        let (replace, rescan) = match &self.fastest {
            None => (true, false),
            Some(fast) if fast.source == obs.source => (obs.ms <= fast.ms, obs.ms > fast.ms),
            Some(fast) => (obs.ms < fast.ms, false),
        };

        if rescan {
            // the cached minimum just got slower; another letter may now lead
            self.fastest = self.scan_fastest();
        } else if replace {
            self.fastest = Some(obs);
        }
    }

    fn scan_fastest(&self) -> Option<Observation> {
        let mut best: Option<(&Source, &SiteLatency)> = None;
        for (source, entry) in &self.detail {
            match best {
                Some((_, current)) if entry.ms >= current.ms => {}
                _ => best = Some((source, entry)),
            }
        }
        best.map(|(source, entry)| Observation {
            source: *source,
            site: entry.site.clone(),
            ms: entry.ms,
        })
    }

    pub fn fastest(&self) -> Option<&Observation> {
        self.fastest.as_ref()
    }

    pub fn get(&self, source: Source) -> Option<&SiteLatency> {
        self.detail.get(&source)
    }

    pub fn len(&self) -> usize {
        self.detail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detail.is_empty()
    }

    /// Observations in detail (insertion) order.
    pub fn observations(&self) -> impl Iterator<Item = Observation> + '_ {
        self.detail.iter().map(|(source, entry)| Observation {
            source: *source,
            site: entry.site.clone(),
            ms: entry.ms,
        })
    }

    /// Observations ordered by latency; equal latencies keep detail order.
    pub fn ranked(&self) -> Vec<Observation> {
        let mut all: Vec<Observation> = self.observations().collect();
        all.sort_by(|a, b| a.ms.total_cmp(&b.ms));
        all
    }

    /// The K-th fastest observation. `k` is clamped to `1..=len`; an empty
    /// record has no answer.
    pub fn kth_fastest(&self, k: u32) -> Option<Observation> {
        if k <= 1 {
            return self.fastest.clone();
        }
        let ranked = self.ranked();
        let index = (k as usize).min(ranked.len()).checked_sub(1)?;
        ranked.into_iter().nth(index)
    }
}

#[derive(Debug, Default)]
pub struct ProbeStore {
    records: BTreeMap<ProbeId, ProbeRecord>,
}

impl ProbeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, probe: ProbeId, obs: Observation) {
        self.records.entry(probe).or_default().observe(obs);
    }

    pub fn get(&self, probe: ProbeId) -> Option<&ProbeRecord> {
        self.records.get(&probe)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ProbeId, &ProbeRecord)> + '_ {
        self.records.iter().map(|(id, rec)| (*id, rec))
    }
}

/// One JSONL export row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeSnapshot {
    pub ts_unix_ms: i64,
    pub probe_id: ProbeId,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub asn_v4: Option<u32>,
    pub fastest: Option<Observation>,
    pub observations: Vec<Observation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f64>,
}

impl ProbeSnapshot {
    pub fn from_record(probe_id: ProbeId, record: &ProbeRecord, ts_unix_ms: i64) -> Self {
        Self {
            ts_unix_ms,
            probe_id,
            lon: None,
            lat: None,
            asn_v4: None,
            fastest: record.fastest().cloned(),
            observations: record.observations().collect(),
            color: None,
            radius: None,
        }
    }

    pub fn to_record(&self) -> ProbeRecord {
        ProbeRecord::from_observations(self.observations.iter().cloned())
    }
}
