//! `reflector` – command line front end for the reflector detector.
//!
//! - `reflector run` connects to rosbridge, subscribes to the filtered scan
//!   topic and publishes one reflector point cloud per processed scan until
//!   Ctrl-C.
//! - `reflector replay <input>` runs a JSON-lines scan recording through the
//!   detector and writes JSON-lines clouds to a file or stdout.
//! - `reflector config` shows the effective configuration; `--init` writes
//!   the defaults to `~/.reflector/config.toml`.

mod config;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use colored::Colorize;
use reflector_middleware::{JsonLinesSink, JsonLinesSource, rosbridge};
use reflector_perception::ReflectorDetector;
use reflector_runtime::{
    ReflectorNode, StatsSnapshot, TelemetryContext, TracerProviderGuard, init_tracing,
};
use tokio::io::{AsyncWrite, BufReader, BufWriter};
use tokio::sync::watch;
use tracing::{info, warn};

const SERVICE_NAME: &str = "reflector";

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "reflector")]
#[command(about = "Detect cylindrical reflectors in planar laser scans")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect reflectors live over a rosbridge connection.
    Run {
        /// rosbridge WebSocket URL (overrides the config file).
        #[arg(long)]
        url: Option<String>,

        /// Path to the config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Replay a JSON-lines scan recording.
    Replay {
        /// Input file, one `sensor_msgs/LaserScan` JSON object per line.
        input: PathBuf,

        /// Output file for the clouds (default: stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show the effective configuration.
    Config {
        /// Write the default configuration if no file exists yet.
        #[arg(long)]
        init: bool,

        /// Path to the config file.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> CliResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { url, config } => {
            let cfg = live_config(url, config)?;
            // Hold the guard for the whole run so pending spans are flushed.
            let _guard = start_tracing(&TelemetryContext::live(
                SERVICE_NAME,
                &cfg.scan_topic,
                &cfg.cloud_topic,
            ));
            tokio_runtime()?.block_on(run_live(cfg))
        }
        Commands::Replay { input, output } => {
            let _guard = start_tracing(&TelemetryContext::replay(SERVICE_NAME, &input));
            tokio_runtime()?.block_on(run_replay(&input, output.as_deref()))
        }
        Commands::Config { init, config } => show_config(init, config),
    }
}

fn tokio_runtime() -> CliResult<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?)
}

fn start_tracing(context: &TelemetryContext) -> TracerProviderGuard {
    let guard = init_tracing(context);
    if guard.is_exporting() {
        info!(mode = context.pipeline.mode(), "exporting spans over OTLP");
    }
    guard
}

// ─────────────────────────────────────────────────────────────────────────────
// reflector run
// ─────────────────────────────────────────────────────────────────────────────

/// Effective live configuration: file, then environment, then `--url`.
fn live_config(url: Option<String>, config_file: Option<PathBuf>) -> CliResult<config::Config> {
    let path = config_file.unwrap_or_else(config::config_path);
    let mut cfg = config::load_or_default(&path)?;
    if let Some(url) = url {
        cfg.rosbridge_url = url;
    }
    Ok(cfg)
}

async fn run_live(cfg: config::Config) -> CliResult<()> {
    // The node treats a dropped sender as shutdown, so one stays here.
    let (stop_tx, stop_rx) = watch::channel(false);
    let handler_tx = stop_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!();
        eprintln!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = handler_tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    eprintln!(
        "  Connecting to {} ({} → {})",
        cfg.rosbridge_url.bold(),
        cfg.scan_topic.cyan(),
        cfg.cloud_topic.cyan()
    );
    let (scans, clouds) =
        rosbridge::connect(&cfg.rosbridge_url, &cfg.scan_topic, &cfg.cloud_topic).await?;
    eprintln!("  {} Detecting reflectors. Press Ctrl-C to stop.", "✓".green().bold());

    let node = ReflectorNode::new(ReflectorDetector::default());
    let stats = node.run(scans, clouds, stop_rx).await?;
    drop(stop_tx);
    print_summary(&stats);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// reflector replay
// ─────────────────────────────────────────────────────────────────────────────

async fn run_replay(input: &Path, output: Option<&Path>) -> CliResult<()> {
    let file = tokio::fs::File::open(input)
        .await
        .map_err(|e| format!("Failed to open {}: {}", input.display(), e))?;
    let source = JsonLinesSource::new(BufReader::new(file));

    let writer: Box<dyn AsyncWrite + Unpin + Send> = match output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .map_err(|e| format!("Failed to create {}: {}", path.display(), e))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };
    let sink = JsonLinesSink::new(BufWriter::new(writer));

    let node = ReflectorNode::new(ReflectorDetector::default());
    let stats = node.replay(source, sink).await?;
    print_summary(&stats);
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// reflector config
// ─────────────────────────────────────────────────────────────────────────────

fn show_config(init: bool, config_file: Option<PathBuf>) -> CliResult<()> {
    let path = config_file.unwrap_or_else(config::config_path);

    if init {
        if path.exists() {
            println!(
                "  Config already exists at {}; leaving it unchanged.",
                path.display().to_string().bold()
            );
        } else {
            config::save_to(&config::Config::default(), &path)?;
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
        }
    }

    let cfg = config::load_or_default(&path)?;
    let source = if path.exists() {
        path.display().to_string()
    } else {
        "built-in defaults".to_string()
    };
    println!("  Effective configuration ({}):", source.dimmed());
    println!("    rosbridge_url = {}", cfg.rosbridge_url.bold());
    println!("    scan_topic    = {}", cfg.scan_topic.bold());
    println!("    cloud_topic   = {}", cfg.cloud_topic.bold());
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Run summary on stderr; stdout may be carrying clouds.
fn print_summary(stats: &StatsSnapshot) {
    eprintln!();
    eprintln!("  {}", "Summary".bold());
    eprintln!("    scans received    {}", stats.scans_received);
    eprintln!("    scans processed   {}", stats.scans_processed);
    eprintln!("    clouds sent       {}", stats.clouds_sent);
    eprintln!("    reflectors        {}", stats.reflectors);
    if stats.scans_dropped > 0 {
        eprintln!(
            "    {} {}",
            "scans dropped    ".yellow(),
            stats.scans_dropped
        );
    }
    if stats.malformed_scans > 0 {
        eprintln!(
            "    {} {}",
            "malformed scans  ".yellow(),
            stats.malformed_scans
        );
    }
    if stats.nonconverged_fits > 0 {
        eprintln!(
            "    {} {}",
            "unconverged fits ".yellow(),
            stats.nonconverged_fits
        );
    }
}
