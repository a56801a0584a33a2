use crate::config::FileConfig;
use crate::engine::globalping::GlobalpingClient;
use crate::engine::GeolocationEngine;
use crate::model::{GeoEvent, GeolocationResult, LocationCandidate, Phase, RunConfig};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Candidates listed in the final text summary.
const SUMMARY_CANDIDATES: usize = 10;

#[derive(Debug, Parser, Clone)]
#[command(
    name = "geolocate",
    version,
    about = "Estimate where an IP address is located from probe latency"
)]
pub struct Cli {
    /// IP address or hostname to locate
    pub target: String,

    /// Probes per phase once the continent is known (more probes cost more quota)
    #[arg(long, short = 'l', value_parser = clap::value_parser!(u32).range(1..))]
    pub limit: Option<u32>,

    /// Globalping API token for higher rate limits
    #[arg(long, env = "GLOBALPING_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Base URL of the measurement API
    #[arg(long)]
    pub api_url: Option<String>,

    /// Print JSON result and exit
    #[arg(long)]
    pub json: bool,

    /// Timeout for each HTTP request to the measurement API
    #[arg(long)]
    pub request_timeout: Option<humantime::Duration>,

    /// Give up on a phase whose measurement is still running after this long
    #[arg(long)]
    pub measurement_timeout: Option<humantime::Duration>,

    /// Delay between measurement status checks
    #[arg(long)]
    pub poll_interval: Option<humantime::Duration>,

    /// Note possible anycast when two continents answer faster than this (ms)
    #[arg(long)]
    pub anycast_threshold_ms: Option<f64>,

    /// Export results as JSON
    #[arg(long)]
    pub export_json: Option<PathBuf>,

    /// Export results as CSV
    #[arg(long)]
    pub export_csv: Option<PathBuf>,

    /// Path to a custom TLS certificate file (PEM or DER format)
    #[arg(long)]
    pub certificate: Option<PathBuf>,

    /// Path to config TOML (defaults to the per-user config file if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    pub log_level: Option<String>,
}

pub async fn run(args: Cli) -> Result<()> {
    let file = FileConfig::resolve(args.config.as_deref())?;
    init_logging(&args, &file)?;

    let cfg = build_config(&args, &file);
    info!(limit = cfg.limit, api_url = %cfg.api_url, token = cfg.token.is_some(), "starting");

    let target = crate::target::resolve_target(&args.target)
        .await
        .with_context(|| format!("cannot geolocate {}", args.target))?;
    if target.to_string() != args.target.trim() {
        eprintln!("Resolved {} to {}", args.target.trim(), target);
    }

    let client = GlobalpingClient::new(&cfg)?;
    let engine = GeolocationEngine::new(client, cfg);

    if args.json {
        run_json(&args, engine, target).await
    } else {
        run_text(&args, engine, target).await
    }
}

/// Build a `RunConfig` from CLI arguments, falling back to the config file.
pub fn build_config(args: &Cli, file: &FileConfig) -> RunConfig {
    let defaults = RunConfig::default();
    let pick = |cli: Option<humantime::Duration>, file: Option<Duration>, default: Duration| {
        cli.map(Duration::from).or(file).unwrap_or(default)
    };
    RunConfig {
        api_url: args
            .api_url
            .clone()
            .or_else(|| file.api_url.clone())
            .unwrap_or(defaults.api_url),
        token: args
            .token
            .clone()
            .or_else(|| file.token.clone())
            .filter(|t| !t.trim().is_empty()),
        limit: args.limit.or(file.limit).unwrap_or(defaults.limit).max(1),
        request_timeout: pick(
            args.request_timeout,
            file.request_timeout,
            defaults.request_timeout,
        ),
        measurement_timeout: pick(
            args.measurement_timeout,
            file.measurement_timeout,
            defaults.measurement_timeout,
        ),
        poll_interval: pick(args.poll_interval, file.poll_interval, defaults.poll_interval),
        anycast_threshold_ms: args
            .anycast_threshold_ms
            .or(file.anycast_threshold_ms)
            .unwrap_or(defaults.anycast_threshold_ms),
        user_agent: defaults.user_agent,
        certificate_path: args.certificate.clone(),
    }
}

fn init_logging(args: &Cli, file: &FileConfig) -> Result<()> {
    let filter = match args.log_level.as_deref().or(file.log_level.as_deref()) {
        Some(level) => {
            EnvFilter::try_new(level).with_context(|| format!("invalid log level: {level}"))?
        }
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))
}

async fn run_json(
    args: &Cli,
    engine: GeolocationEngine<GlobalpingClient>,
    target: IpAddr,
) -> Result<()> {
    // No progress output in JSON mode; the receiver is dropped right away.
    let (evt_tx, _) = mpsc::channel::<GeoEvent>(1);
    let result = engine
        .run(target, evt_tx)
        .await
        .context("geolocation failed")?;

    handle_exports(args, &result)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_text(
    args: &Cli,
    engine: GeolocationEngine<GlobalpingClient>,
    target: IpAddr,
) -> Result<()> {
    let (evt_tx, mut evt_rx) = mpsc::channel::<GeoEvent>(256);

    let printer = async {
        while let Some(ev) = evt_rx.recv().await {
            if let Some(line) = render_event(&ev) {
                eprintln!("{line}");
            }
        }
    };
    let (result, ()) = tokio::join!(engine.run(target, evt_tx), printer);
    let result = result.context("geolocation failed")?;

    handle_exports(args, &result)?;
    print!("{}", render_summary(&result));
    Ok(())
}

/// One stderr line for a progress event.
pub fn render_event(ev: &GeoEvent) -> Option<String> {
    match ev {
        GeoEvent::PhaseStarted { phase, step } => {
            Some(format!("== Phase {step}: {} ==", phase.title()))
        }
        GeoEvent::MeasurementCreated { id, probes, .. } => {
            Some(format!("Measurement {id} started with {probes} probes"))
        }
        GeoEvent::Progress {
            phase,
            finished,
            expected,
            leader,
            leader_rtt_ms,
        } => {
            let pct = if *expected == 0 {
                100.0
            } else {
                (*finished as f64 / *expected as f64 * 100.0).min(100.0)
            };
            let leader = match (leader, leader_rtt_ms) {
                (Some(name), Some(rtt)) => format!("leader {name} {rtt:.2} ms"),
                _ => "waiting for results".to_string(),
            };
            Some(format!(
                "{}: {finished}/{expected} ({pct:.0}%) {leader}",
                phase.title()
            ))
        }
        GeoEvent::PhaseCompleted { phase, top, winner } => {
            Some(render_phase_summary(*phase, top, winner.as_ref()))
        }
        GeoEvent::Info { message } => Some(message.clone()),
    }
}

fn render_phase_summary(
    phase: Phase,
    top: &[LocationCandidate],
    winner: Option<&LocationCandidate>,
) -> String {
    let Some(winner) = winner else {
        return format!("{}: no usable measurements", phase.title());
    };
    let metric = phase.metric();
    let ranked: Vec<String> = top
        .iter()
        .take(3)
        .map(|c| format!("{} {:.2} ms", c.label(phase), c.metric(metric)))
        .collect();
    format!(
        "{} top: {} -> winner {} ({:.2} ms)",
        phase.title(),
        ranked.join(", "),
        winner.label(phase),
        winner.metric(metric)
    )
}

/// Final stdout summary. Anycast targets get a notice instead of a location.
pub fn render_summary(result: &GeolocationResult) -> String {
    if result.anycast {
        return format!(
            "{} appears to be an anycast address: it answers from several locations, so latency cannot pin it to one place.\n",
            result.target
        );
    }
    let Some(winner) = result.winner() else {
        return format!(
            "No location could be determined for {} ({} phase returned no candidates).\n",
            result.target, result.final_phase
        );
    };

    let phase = result.final_phase;
    let metric = phase.metric();
    let mut out = String::new();
    out.push_str(&format!("Target:     {}\n", result.target));
    out.push_str(&format!("Location:   {}\n", winner.label(phase)));
    out.push_str(&format!("Latency:    {:.2} ms\n", winner.metric(metric)));
    if let Some(confidence) = result.confidence {
        out.push_str(&format!("Confidence: {}\n", confidence.label()));
    }
    if result.anycast_suspected {
        out.push_str(
            "Note:       probes on several continents answered very fast; the target may be anycast\n",
        );
    }
    if phase != Phase::City {
        out.push_str(&format!("Resolution: stopped at {phase} level\n"));
    }
    if result.candidates.len() > 1 {
        out.push_str("Candidates:\n");
        for (i, c) in result.candidates.iter().take(SUMMARY_CANDIDATES).enumerate() {
            out.push_str(&format!(
                "{:>3}. {} {:.2} ms ({} probes)\n",
                i + 1,
                c.label(phase),
                c.metric(metric),
                c.samples
            ));
        }
    }
    out
}

/// Handle export operations (JSON and CSV) for both text and JSON modes.
fn handle_exports(args: &Cli, result: &GeolocationResult) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        crate::storage::export_json(p, result)?;
    }
    if let Some(p) = args.export_csv.as_deref() {
        crate::storage::export_csv(p, result)?;
    }
    Ok(())
}
