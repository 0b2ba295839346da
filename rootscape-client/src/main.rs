mod atlas;

use std::collections::HashMap;
use std::env;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use rootscape_core::style::resolution_for_zoom;
use rootscape_core::{
    now_unix_ms, panel, run_view_events, Config, FeedCoordinator, LoadReport, MetaCache, ProbeId,
    ProbeSnapshot, ProbeStyle, StyleCache, ViewEvent, ViewModel, ViewState,
};
use tokio::sync::{mpsc, watch};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use atlas::AtlasClient;

#[derive(Parser, Debug)]
#[command(about = "Map DNS root-server latency and anycast sites from RIPE Atlas probes")]
struct Args {
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shareable view descriptor (the part after `#`).
    #[arg(long, default_value = "")]
    view: String,

    #[arg(long)]
    top: Option<u32>,

    #[arg(long)]
    scale: Option<f64>,

    #[arg(long)]
    zoom: Option<f64>,

    /// Map center as `LON,LAT`.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    center: Option<Vec<f64>>,

    /// JSONL snapshot destination; overrides `outputPath`.
    #[arg(long)]
    output: Option<String>,

    /// Show the detail panel for a probe (repeatable).
    #[arg(long = "probe")]
    probes: Vec<ProbeId>,

    /// Dump identity strings that matched no extraction rule.
    #[arg(long)]
    mismatches: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    let view = ViewModel::load(&args.view);
    let events = view_events(&args, view.state());
    let view = settle_view(view, events, cfg.debounce()).await?;

    let api = Arc::new(AtlasClient::new(&cfg)?);
    let output_path = args
        .output
        .as_deref()
        .or(cfg.output_path.as_deref())
        .map(expand_tilde);

    println!("ROOTSCAPE running");
    println!("  api:       {}", cfg.api_base);
    println!("  fastest:   {}", view.state().rank_threshold);
    println!("  scale:     {}ms", view.state().scale_ms);
    if let Some(path) = &output_path {
        println!("  output:    {}", path.display());
    }

    println!("Loading: probe locations");
    let locations = match api.locations().await {
        Ok(locations) => locations,
        Err(err) => {
            warn!(error = %err, "probe locations unavailable, continuing without coordinates");
            HashMap::new()
        }
    };

    let coordinator = Arc::new(FeedCoordinator::new(Arc::clone(&api)));
    let progress = tokio::spawn(show_progress(Arc::clone(&coordinator)));
    let report = coordinator.load_all().await;
    progress.abort();
    println!(
        "{}",
        coordinator.with_state(|state| state.pending().progress_label())
    );
    print_report(&report);

    if args.mismatches {
        coordinator.with_state(|state| {
            for group in state.mismatches().summarize() {
                println!("{}", group.hostname);
                for (source, probes) in &group.sources {
                    println!("  {} {:?}", source.letter(), probes);
                }
            }
        });
    }

    let meta = MetaCache::new(Arc::clone(&api));
    let mut asns: HashMap<ProbeId, u32> = HashMap::new();
    for &probe in &args.probes {
        let info = meta.get(probe).await;
        if let Some(asn) = info.as_ref().and_then(|m| m.asn_v4) {
            asns.insert(probe, asn);
        }
        println!("{}", panel::probe_heading(probe, info.as_ref()));
        coordinator.with_state(|state| match state.store().get(probe) {
            Some(record) => println!("  {}", panel::measurement_line(record)),
            None => println!("  no measurements"),
        });
    }

    let resolution = resolution_for_zoom(view.state().zoom);
    let mut styles = StyleCache::new();
    let ts = now_unix_ms();
    let snapshots: Vec<ProbeSnapshot> = coordinator.with_state(|state| {
        state
            .store()
            .iter()
            .map(|(probe, record)| {
                let mut snap = ProbeSnapshot::from_record(probe, record, ts);
                if let Some(style) = ProbeStyle::derive(record, view.state(), resolution) {
                    let fill = styles.fill(&style, view.state().scale_ms);
                    snap.color = Some(fill.color.clone());
                    snap.radius = Some(fill.radius);
                }
                if let Some(&(lon, lat)) = locations.get(&probe) {
                    snap.lon = Some(lon);
                    snap.lat = Some(lat);
                }
                snap.asn_v4 = asns.get(&probe).copied();
                snap
            })
            .collect()
    });
    let located = snapshots.iter().filter(|s| s.lon.is_some()).count();
    println!(
        "[ok] {} probes ({} located), {} marker styles",
        snapshots.len(),
        located,
        styles.len()
    );

    if let Some(path) = &output_path {
        write_snapshots(path, &snapshots)
            .with_context(|| format!("writing snapshot to {}", path.display()))?;
    }

    println!("{}#{}", cfg.page_base, view.location());
    Ok(())
}

fn view_events(args: &Args, state: &ViewState) -> Vec<ViewEvent> {
    let mut events = Vec::new();
    let center = match args.center.as_deref() {
        Some(&[lon, lat]) => Some((lon, lat)),
        _ => None,
    };
    if args.zoom.is_some() || center.is_some() {
        events.push(ViewEvent::ViewportChanged {
            zoom: args.zoom.unwrap_or(state.zoom),
            center: center.unwrap_or(state.center),
        });
    }
    if let Some(k) = args.top {
        events.push(ViewEvent::RankChanged(k));
    }
    if let Some(ms) = args.scale {
        events.push(ViewEvent::ScaleChanged(ms));
    }
    events
}

async fn settle_view(
    view: ViewModel,
    events: Vec<ViewEvent>,
    quiet: Duration,
) -> anyhow::Result<ViewModel> {
    let model = Arc::new(Mutex::new(view));
    let (redraw, _redraw_rx) = watch::channel(0u64);
    let (tx, rx) = mpsc::channel(events.len().max(1));
    let task = tokio::spawn(run_view_events(rx, Arc::clone(&model), redraw, quiet));
    for event in events {
        if tx.send(event).await.is_err() {
            break;
        }
    }
    drop(tx);
    task.await.context("view event loop")?;
    let view = model.lock().clone();
    Ok(view)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn show_progress(coordinator: Arc<FeedCoordinator<AtlasClient>>) {
    let mut redraws = coordinator.subscribe();
    while redraws.changed().await.is_ok() {
        let label = coordinator.with_state(|state| state.pending().progress_label());
        println!("{label}");
    }
}

fn print_report(report: &LoadReport) {
    for (source, stats) in &report.loaded {
        println!(
            "[ok] {} {} sites, {} mismatched, {} skipped",
            source, stats.observations, stats.mismatches, stats.skipped
        );
    }
    for (source, err) in &report.failed {
        println!("[!!] {} feed failed: {}", source, err);
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

fn write_snapshots(path: &Path, snapshots: &[ProbeSnapshot]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for snap in snapshots {
        serde_json::to_writer(&mut writer, snap)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tilde_expands_to_home() {
        if let Ok(home) = env::var("HOME") {
            assert_eq!(expand_tilde("~/x/y.jsonl"), PathBuf::from(home).join("x/y.jsonl"));
        }
        assert_eq!(expand_tilde("/tmp/y.jsonl"), PathBuf::from("/tmp/y.jsonl"));
    }

    #[test]
    fn args_accept_repeated_probes() {
        let args = Args::try_parse_from([
            "rootscape", "--probe", "100", "--probe", "7", "--top", "3", "--mismatches",
        ])
        .unwrap();
        assert_eq!(args.probes, vec![100, 7]);
        assert_eq!(args.top, Some(3));
        assert!(args.mismatches);
        assert_eq!(args.view, "");
    }

    #[test]
    fn viewport_flags_become_one_event() {
        let args = Args::try_parse_from(["rootscape", "--center", "-0.1,51.5", "--scale", "50"])
            .unwrap();
        let events = view_events(&args, &ViewState::default());
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            ViewEvent::ViewportChanged { zoom, center } if zoom == 3.0 && center == (-0.1, 51.5)
        ));
        assert!(matches!(events[1], ViewEvent::ScaleChanged(ms) if ms == 50.0));
    }

    #[tokio::test]
    async fn view_flags_are_applied_through_the_event_loop() {
        let args = Args::try_parse_from(["rootscape", "--zoom", "6", "--top", "2"]).unwrap();
        let view = ViewModel::load("");
        let events = view_events(&args, view.state());
        let view = settle_view(view, events, Config::default().debounce())
            .await
            .unwrap();
        assert_eq!(view.state().zoom, 6.0);
        assert_eq!(view.state().rank_threshold, 2);
        assert_eq!(ViewModel::load(view.location()).state(), view.state());
    }
}
