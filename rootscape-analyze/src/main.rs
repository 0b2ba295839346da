use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rootscape_core::style::{radius_for_resolution, resolution_for_zoom};
use rootscape_core::{ProbeSnapshot, ProbeStyle, Source, ViewEvent, ViewModel, ViewState};
use serde::Serialize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const TOP_SITES: usize = 5;
const FAST_HUE: u16 = 80;
const MEDIUM_HUE: u16 = 40;

#[derive(Parser, Debug)]
#[command(about = "Re-derive ROOTSCAPE marker styles and site summaries from a JSONL snapshot")]
struct Args {
    #[arg(long)]
    snapshot: PathBuf,

    /// Shareable view descriptor; defaults apply when omitted.
    #[arg(long, default_value = "")]
    view: String,

    #[arg(long)]
    top: Option<u32>,

    #[arg(long)]
    scale: Option<f64>,

    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct Params {
    rank_threshold: u32,
    scale_ms: f64,
    zoom: f64,
    resolution: f64,
    radius: f64,
    descriptor: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct HueBands {
    fast: usize,
    medium: usize,
    slow: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RankStats {
    probes: usize,
    p05_ms: Option<f64>,
    p50_ms: Option<f64>,
    p95_ms: Option<f64>,
    bands: HueBands,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct SiteReport {
    site: String,
    probes: usize,
    p50_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LetterReport {
    letter: Source,
    probes: usize,
    sites: usize,
    fastest_for: usize,
    p50_ms: Option<f64>,
    top_sites: Vec<SiteReport>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisOutput {
    params: Params,
    records: usize,
    rank: RankStats,
    letters: Vec<LetterReport>,
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut view = ViewModel::load(&args.view);
    if let Some(k) = args.top {
        view.dispatch(ViewEvent::RankChanged(k));
    }
    if let Some(ms) = args.scale {
        view.dispatch(ViewEvent::ScaleChanged(ms));
    }

    let snapshots = load_jsonl(&args.snapshot)
        .with_context(|| format!("reading {}", args.snapshot.display()))?;

    let resolution = resolution_for_zoom(view.state().zoom);
    let params = Params {
        rank_threshold: view.state().rank_threshold,
        scale_ms: view.state().scale_ms,
        zoom: view.state().zoom,
        resolution,
        radius: radius_for_resolution(resolution),
        descriptor: view.location().to_string(),
    };

    let output = AnalysisOutput {
        params,
        records: snapshots.len(),
        rank: rank_stats(&snapshots, view.state(), resolution),
        letters: letter_reports(&snapshots),
    };

    if args.json {
        let text = serde_json::to_string_pretty(&output)
            .unwrap_or_else(|_| "{\"error\":\"failed to serialize\"}".to_string());
        println!("{text}");
        return Ok(());
    }

    print_summary(&output);
    Ok(())
}

fn load_jsonl(path: &PathBuf) -> anyhow::Result<Vec<ProbeSnapshot>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ProbeSnapshot>(&line) {
            Ok(snap) => out.push(snap),
            Err(err) => warn!(line = lineno + 1, error = %err, "skipping malformed snapshot row"),
        }
    }
    debug!(rows = out.len(), "snapshot loaded");
    Ok(out)
}

fn rank_stats(snapshots: &[ProbeSnapshot], view: &ViewState, resolution: f64) -> RankStats {
    let mut bands = HueBands::default();
    let mut latencies = Vec::with_capacity(snapshots.len());
    for snap in snapshots {
        let Some(style) = ProbeStyle::derive(&snap.to_record(), view, resolution) else {
            continue;
        };
        match style.hue {
            h if h >= FAST_HUE => bands.fast += 1,
            h if h >= MEDIUM_HUE => bands.medium += 1,
            _ => bands.slow += 1,
        }
        latencies.push(style.ms);
    }
    latencies.sort_by(|a, b| a.total_cmp(b));
    RankStats {
        probes: latencies.len(),
        p05_ms: quantile(&latencies, 0.05),
        p50_ms: quantile(&latencies, 0.50),
        p95_ms: quantile(&latencies, 0.95),
        bands,
    }
}

fn letter_reports(snapshots: &[ProbeSnapshot]) -> Vec<LetterReport> {
    let mut by_letter: BTreeMap<Source, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
    let mut fastest_for: HashMap<Source, usize> = HashMap::new();
    for snap in snapshots {
        for obs in &snap.observations {
            by_letter
                .entry(obs.source)
                .or_default()
                .entry(obs.site.clone())
                .or_default()
                .push(obs.ms);
        }
        if let Some(fast) = &snap.fastest {
            *fastest_for.entry(fast.source).or_default() += 1;
        }
    }

    by_letter
        .into_iter()
        .map(|(letter, sites)| {
            let mut all: Vec<f64> = sites.values().flatten().copied().collect();
            all.sort_by(|a, b| a.total_cmp(b));

            let mut site_reports: Vec<SiteReport> = sites
                .into_iter()
                .map(|(site, mut ms)| {
                    ms.sort_by(|a, b| a.total_cmp(b));
                    SiteReport {
                        site,
                        probes: ms.len(),
                        p50_ms: quantile(&ms, 0.50),
                    }
                })
                .collect();
            let site_count = site_reports.len();
            // busiest first; ties by site name from the BTreeMap order
            site_reports.sort_by(|a, b| b.probes.cmp(&a.probes));
            site_reports.truncate(TOP_SITES);

            LetterReport {
                letter,
                probes: all.len(),
                sites: site_count,
                fastest_for: fastest_for.get(&letter).copied().unwrap_or(0),
                p50_ms: quantile(&all, 0.50),
                top_sites: site_reports,
            }
        })
        .collect()
}

fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted.get(idx).copied()
}

fn fmt_ms(v: Option<f64>) -> String {
    v.map(|v| format!("{:.1}ms", v))
        .unwrap_or_else(|| "-".to_string())
}

fn print_summary(output: &AnalysisOutput) {
    let p = &output.params;
    println!(
        "View: fastest {} / latency range {}ms / zoom {} (radius {:.1}px)",
        p.rank_threshold, p.scale_ms, p.zoom, p.radius
    );
    println!("Snapshot: {} probes", output.records);

    let r = &output.rank;
    println!(
        "\nRank-{} latency over {} probes: p05={} p50={} p95={}",
        p.rank_threshold,
        r.probes,
        fmt_ms(r.p05_ms),
        fmt_ms(r.p50_ms),
        fmt_ms(r.p95_ms)
    );
    println!(
        "  fast={} medium={} slow={}",
        r.bands.fast, r.bands.medium, r.bands.slow
    );

    println!("\nPer letter:");
    for letter in &output.letters {
        let sites: Vec<String> = letter
            .top_sites
            .iter()
            .map(|s| format!("{}({})", s.site.to_uppercase(), s.probes))
            .collect();
        println!(
            "  {} probes={} sites={} fastest_for={} p50={}  {}",
            letter.letter,
            letter.probes,
            letter.sites,
            letter.fastest_for,
            fmt_ms(letter.p50_ms),
            sites.join(" ")
        );
    }
    println!("\nDescriptor: {}", p.descriptor);
}
