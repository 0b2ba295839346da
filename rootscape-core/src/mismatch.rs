use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::source::Source;
use crate::ProbeId;

/// Identity strings that failed their letter's extraction rule, grouped by
/// hostname and then by letter. Append-only.
#[derive(Debug, Default)]
pub struct MismatchLedger {
    entries: BTreeMap<String, IndexMap<Source, Vec<ProbeId>>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MismatchGroup<'a> {
    pub hostname: &'a str,
    pub sources: Vec<(Source, &'a [ProbeId])>,
}

impl MismatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, probe: ProbeId, source: Source, hostname: &str) {
        self.entries
            .entry(hostname.to_string())
            .or_default()
            .entry(source)
            .or_default()
            .push(probe);
    }

    /// Number of distinct hostnames recorded.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Groups in hostname order; letters in the order they were first seen.
    pub fn summarize(&self) -> impl Iterator<Item = MismatchGroup<'_>> + '_ {
        self.entries.iter().map(|(hostname, by_source)| MismatchGroup {
            hostname,
            sources: by_source
                .iter()
                .map(|(source, probes)| (*source, probes.as_slice()))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_reports_are_kept() {
        let mut ledger = MismatchLedger::new();
        ledger.record(7, Source::G, "xx1");
        ledger.record(7, Source::G, "xx1");

        let groups: Vec<_> = ledger.summarize().collect();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].hostname, "xx1");
        assert_eq!(groups[0].sources, vec![(Source::G, &[7u32, 7][..])]);
    }

    #[test]
    fn hostnames_are_sorted_and_letters_keep_first_seen_order() {
        let mut ledger = MismatchLedger::new();
        ledger.record(3, Source::M, "zz");
        ledger.record(1, Source::K, "aa");
        ledger.record(2, Source::B, "aa");
        ledger.record(4, Source::K, "aa");

        let groups: Vec<_> = ledger.summarize().collect();
        let names: Vec<&str> = groups.iter().map(|g| g.hostname).collect();
        assert_eq!(names, vec!["aa", "zz"]);
        assert_eq!(
            groups[0].sources,
            vec![(Source::K, &[1u32, 4][..]), (Source::B, &[2u32][..])]
        );
        assert_eq!(ledger.len(), 2);
    }
}
