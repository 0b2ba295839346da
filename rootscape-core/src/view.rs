use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ViewError;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub zoom: f64,
    /// (lon, lat)
    pub center: (f64, f64),
    pub rank_threshold: u32,
    pub scale_ms: f64,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            zoom: 3.0,
            center: (0.0, 30.0),
            rank_threshold: 1,
            scale_ms: 100.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewPatch {
    pub zoom: Option<f64>,
    pub center: Option<(f64, f64)>,
    pub rank_threshold: Option<u32>,
    pub scale_ms: Option<f64>,
}

impl ViewPatch {
    pub fn from_object(obj: &Map<String, Value>) -> Self {
        let field = |names: &[&str]| names.iter().find_map(|name| obj.get(*name));

        Self {
            zoom: field(&["zoom"]).and_then(coerce_number),
            center: field(&["center"]).and_then(coerce_pair),
            rank_threshold: field(&["rankThreshold", "top"])
                .and_then(coerce_number)
                .map(|k| k.max(0.0) as u32),
            scale_ms: field(&["scaleMs", "scale"]).and_then(coerce_number),
        }
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn coerce_pair(value: &Value) -> Option<(f64, f64)> {
    match value.as_array()?.as_slice() {
        [lon, lat] => Some((coerce_number(lon)?, coerce_number(lat)?)),
        _ => None,
    }
}

impl ViewState {
    pub fn apply(&mut self, patch: &ViewPatch) {
        if let Some(zoom) = patch.zoom {
            self.zoom = zoom;
        }
        if let Some(center) = patch.center {
            self.center = center;
        }
        if let Some(k) = patch.rank_threshold {
            self.rank_threshold = k;
        }
        if let Some(scale) = patch.scale_ms {
            self.scale_ms = scale;
        }
    }

    pub fn to_descriptor(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Defaults with the descriptor's fields merged over them. An empty
    /// descriptor yields the defaults.
    pub fn from_descriptor(descriptor: &str) -> Result<Self, ViewError> {
        let mut state = Self::default();
        let descriptor = descriptor.trim().trim_start_matches('#');
        if descriptor.is_empty() {
            return Ok(state);
        }
        let bytes = URL_SAFE_NO_PAD.decode(descriptor)?;
        let value: Value = serde_json::from_slice(&bytes)?;
        let obj = value.as_object().ok_or(ViewError::NotAnObject)?;
        state.apply(&ViewPatch::from_object(obj));
        Ok(state)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewEvent {
    ViewportChanged { zoom: f64, center: (f64, f64) },
    RankChanged(u32),
    ScaleChanged(f64),
}

#[derive(Debug, Clone)]
pub struct ViewModel {
    state: ViewState,
    location: String,
    revision: u64,
}

impl ViewModel {
    // A malformed descriptor falls back to the defaults.
    pub fn load(location: &str) -> Self {
        let state = ViewState::from_descriptor(location).unwrap_or_else(|err| {
            warn!(error = %err, "ignoring malformed view descriptor");
            ViewState::default()
        });
        let mut model = Self {
            state,
            location: String::new(),
            revision: 0,
        };
        model.save();
        model
    }

    pub fn save(&mut self) {
        self.location = self.state.to_descriptor();
        self.revision += 1;
        debug!(revision = self.revision, location = %self.location, "view state saved");
    }

    pub fn update(&mut self, patch: &ViewPatch) {
        self.state.apply(patch);
        self.save();
    }

    /// Applies one event and reports whether probe styles must be redrawn.
    pub fn dispatch(&mut self, event: ViewEvent) -> bool {
        match event {
            ViewEvent::ViewportChanged { zoom, center } => {
                self.update(&ViewPatch {
                    zoom: Some(zoom),
                    center: Some(center),
                    ..ViewPatch::default()
                });
                false
            }
            ViewEvent::RankChanged(k) => {
                self.update(&ViewPatch {
                    rank_threshold: Some(k),
                    ..ViewPatch::default()
                });
                true
            }
            ViewEvent::ScaleChanged(ms) => {
                self.update(&ViewPatch {
                    scale_ms: Some(ms),
                    ..ViewPatch::default()
                });
                true
            }
        }
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }
}

/// Only the last viewport change of a burst is applied, once `quiet` has
/// passed without another. Rank and scale changes apply immediately.
pub async fn run_view_events(
    mut events: mpsc::Receiver<ViewEvent>,
    model: Arc<Mutex<ViewModel>>,
    redraw: watch::Sender<u64>,
    quiet: Duration,
) {
    let mut pending: Option<ViewEvent> = None;
    let mut deadline: Option<Instant> = None;
    loop {
        let settle = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            event = events.recv() => match event {
                Some(event @ ViewEvent::ViewportChanged { .. }) => {
                    pending = Some(event);
                    deadline = Some(Instant::now() + quiet);
                }
                Some(event) => {
                    if model.lock().dispatch(event) {
                        redraw.send_modify(|generation| *generation += 1);
                    }
                }
                None => break,
            },
            _ = settle => {
                deadline = None;
                if let Some(event) = pending.take() {
                    model.lock().dispatch(event);
                }
            }
        }
    }
    if let Some(event) = pending.take() {
        model.lock().dispatch(event);
    }
}
