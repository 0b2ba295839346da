//! Marker style derivation: latency to hue, map resolution to radius.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::store::ProbeRecord;
use crate::view::ViewState;

const MIN_RADIUS: f64 = 3.0;
const MAX_RADIUS: f64 = 6.0;
const RADIUS_RESOLUTION_FACTOR: f64 = 20000.0;
const MIN_SCALE_MS: f64 = 1.0;
const HUE_EXPONENT: f64 = 0.8;
const GREEN_HUE: f64 = 120.0;
/// Web Mercator metres per pixel at zoom 0 on the equator.
const ZOOM0_RESOLUTION: f64 = 156_543.033_92;

pub fn resolution_for_zoom(zoom: f64) -> f64 {
    ZOOM0_RESOLUTION / 2f64.powf(zoom)
}

/// Marker radius in pixels, floored to tenths.
pub fn radius_for_resolution(resolution: f64) -> f64 {
    let size = (RADIUS_RESOLUTION_FACTOR / resolution)
        .floor()
        .clamp(MIN_RADIUS, MAX_RADIUS);
    (10.0 * size).floor() / 10.0
}

/// Hue from 120 (green, fast) down to 0 (red, at or beyond `scale_ms`).
pub fn hue_for_latency(ms: f64, scale_ms: f64) -> u16 {
    let scale = if scale_ms.is_finite() {
        scale_ms.max(MIN_SCALE_MS)
    } else {
        MIN_SCALE_MS
    };
    let ratio = (ms.max(0.0).min(scale) / scale).powf(HUE_EXPONENT);
    (GREEN_HUE * (1.0 - ratio)).floor() as u16
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeStyle {
    pub ms: f64,
    pub hue: u16,
    pub radius: f64,
    pub z_index: f64,
}

impl ProbeStyle {
    /// `None` until the probe has at least one observation.
    pub fn derive(record: &ProbeRecord, view: &ViewState, resolution: f64) -> Option<Self> {
        let ms = record.kth_fastest(view.rank_threshold)?.ms;
        Some(Self {
            ms,
            hue: hue_for_latency(ms, view.scale_ms),
            radius: radius_for_resolution(resolution),
            z_index: ms,
        })
    }

    pub fn color(&self) -> String {
        hsla(self.hue)
    }
}

fn hsla(hue: u16) -> String {
    format!("hsla({hue},80%,50%,0.6)")
}

/// The drawable part shared by every marker with the same key.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub color: String,
    pub radius: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FillKey {
    scale_bits: u64,
    hue: u16,
    radius_tenths: u32,
}

#[derive(Debug, Default)]
pub struct StyleCache {
    fills: HashMap<FillKey, Arc<Fill>>,
}

impl StyleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(&mut self, style: &ProbeStyle, scale_ms: f64) -> Arc<Fill> {
        let key = FillKey {
            scale_bits: scale_ms.to_bits(),
            hue: style.hue,
            radius_tenths: (style.radius * 10.0).round() as u32,
        };
        Arc::clone(self.fills.entry(key).or_insert_with(|| {
            Arc::new(Fill {
                color: style.color(),
                radius: style.radius,
            })
        }))
    }

    pub fn len(&self) -> usize {
        self.fills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;
    use crate::store::Observation;

    #[test]
    fn hue_spans_green_to_red() {
        assert_eq!(hue_for_latency(0.0, 100.0), 120);
        assert_eq!(hue_for_latency(100.0, 100.0), 0);
        assert_eq!(hue_for_latency(250.0, 100.0), 0);
        // (0.5)^0.8 = 0.574..., 120 * 0.4256 = 51.07
        assert_eq!(hue_for_latency(50.0, 100.0), 51);
    }

    #[test]
    fn degenerate_scale_is_clamped() {
        assert_eq!(hue_for_latency(0.5, 0.0), hue_for_latency(0.5, 1.0));
        assert_eq!(hue_for_latency(5.0, -10.0), 0);
        assert_eq!(hue_for_latency(-3.0, 100.0), 120);
        assert_eq!(hue_for_latency(5.0, f64::NAN), 0);
    }

    #[test]
    fn radius_tracks_resolution() {
        assert_eq!(radius_for_resolution(100_000.0), 3.0);
        assert_eq!(radius_for_resolution(4000.0), 5.0);
        assert_eq!(radius_for_resolution(10.0), 6.0);
        assert_eq!(radius_for_resolution(resolution_for_zoom(3.0)), 3.0);
        assert_eq!(radius_for_resolution(resolution_for_zoom(10.0)), 6.0);
    }

    #[test]
    fn derive_uses_rank_threshold() {
        let record = ProbeRecord::from_observations([
            Observation {
                source: Source::A,
                site: "fra".into(),
                ms: 10.0,
            },
            Observation {
                source: Source::B,
                site: "ams".into(),
                ms: 100.0,
            },
        ]);
        let mut view = ViewState::default();
        let fast = ProbeStyle::derive(&record, &view, 4000.0).unwrap();
        view.rank_threshold = 2;
        let slow = ProbeStyle::derive(&record, &view, 4000.0).unwrap();
        assert_eq!(fast.ms, 10.0);
        assert_eq!(slow.hue, 0);
        assert_eq!(slow.z_index, 100.0);
        assert_eq!(slow.color(), "hsla(0,80%,50%,0.6)");
        assert!(ProbeStyle::derive(&ProbeRecord::new(), &view, 4000.0).is_none());
    }

    #[test]
    fn fills_are_shared_per_key() {
        let mut cache = StyleCache::new();
        let a = ProbeStyle {
            ms: 20.0,
            hue: 80,
            radius: 4.0,
            z_index: 20.0,
        };
        let b = ProbeStyle { ms: 21.0, z_index: 21.0, ..a.clone() };
        let first = cache.fill(&a, 100.0);
        let second = cache.fill(&b, 100.0);
        assert!(Arc::ptr_eq(&first, &second));
        cache.fill(&a, 50.0);
        assert_eq!(cache.len(), 2);
    }
}
