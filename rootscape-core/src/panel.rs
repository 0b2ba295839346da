use crate::meta::ProbeMeta;
use crate::store::ProbeRecord;
use crate::ProbeId;

/// `Probe #id`, followed by the IPv4 AS number once metadata is known.
pub fn probe_heading(probe: ProbeId, meta: Option<&ProbeMeta>) -> String {
    match meta.and_then(|m| m.asn_v4) {
        Some(asn) => format!("Probe #{probe}, AS{asn}"),
        None => format!("Probe #{probe}"),
    }
}

/// Every letter for the probe, fastest first: `B: 8.1 (AMS), A: 12.3 (FRA)`.
pub fn measurement_line(record: &ProbeRecord) -> String {
    record
        .ranked()
        .iter()
        .map(|obs| {
            format!(
                "{}: {:.1} ({})",
                obs.source,
                obs.ms,
                obs.site.to_uppercase()
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}
