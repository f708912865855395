//! # voltkit - Fleet Runtime CLI
//!
//! Runs N power-station devices from a YAML config file.
//!
//! ```bash
//! # Show the resolved device pipeline, no I/O
//! voltkit runtime --config fleet.yaml --dry-run
//!
//! # Poll every device once and write to the configured sinks
//! voltkit runtime --config fleet.yaml --once --connect
//!
//! # Enable debug logging
//! RUST_LOG=debug voltkit runtime --config fleet.yaml --once
//! ```
//!
//! Exit codes: 0 success, 1 at least one device failed under `--once`,
//! 2 config or usage error, 130 interrupted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use voltkit_core::snapshot::DeviceSnapshot;
use voltkit_core::transport::Sink;
use voltkit_io::MemorySink;
use voltkit_runtime::{DeviceSummary, RuntimeRegistry};

const EXIT_OK: i32 = 0;
const EXIT_DEVICE_ERRORS: i32 = 1;
const EXIT_CONFIG: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

/// Fleet runtime for power-station devices
#[derive(Parser, Debug)]
#[command(name = "voltkit")]
#[command(about = "Power station fleet runtime")]
struct Args {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run N devices from a config file
    Runtime {
        /// Path to the runtime YAML config
        #[arg(long)]
        config: PathBuf,

        /// Print the resolved device pipeline and exit; no I/O
        #[arg(long)]
        dry_run: bool,

        /// Poll every device once and write results to configured sinks
        #[arg(long)]
        once: bool,

        /// Connect/disconnect transports around `--once`
        #[arg(long)]
        connect: bool,
    },
}

fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn format_dry_run(summaries: &[DeviceSummary]) -> String {
    let mut lines = vec!["Device pipeline (dry-run):".to_string()];
    lines.push(format!(
        "  {:<18}  {:<7}  {:<8}  {:<9}  {:<9}  {:>13}  {:<4}  {:<5}  {:<6}  {:<10}",
        "device_id",
        "vendor",
        "protocol",
        "profile",
        "transport",
        "poll_interval",
        "mode",
        "write",
        "stream",
        "sink"
    ));
    lines.push(format!(
        "  {:<18}  {:<7}  {:<8}  {:<9}  {:<9}  {:>13}  {:<4}  {:<5}  {:<6}  {:<10}",
        "-".repeat(18),
        "-".repeat(7),
        "-".repeat(8),
        "-".repeat(9),
        "-".repeat(9),
        "-".repeat(13),
        "-".repeat(4),
        "-".repeat(5),
        "-".repeat(6),
        "-".repeat(10)
    ));

    for summary in summaries {
        let device_id = if summary.device_id.len() <= 18 {
            summary.device_id.clone()
        } else {
            format!("{}...", &summary.device_id[..15])
        };
        lines.push(format!(
            "  {:<18}  {:<7}  {:<8}  {:<9}  {:<9}  {:>12}s  {:<4}  {:<5}  {:<6}  {:<10}",
            device_id,
            summary.vendor,
            summary.protocol,
            summary.profile_id,
            summary.transport_key,
            summary.poll_interval as u64,
            summary.mode.as_str(),
            if summary.can_write { "Yes" } else { "No" },
            if summary.supports_streaming { "Yes" } else { "No" },
            summary.sink_name
        ));
    }
    lines.push(String::new());
    lines.push(format!("{} device(s) registered.", summaries.len()));
    lines.join("\n")
}

fn print_snapshot(snapshot: &DeviceSnapshot) {
    if snapshot.ok() {
        println!(
            "[{}] OK — {} blocks, state: {} fields, {:.1}ms",
            snapshot.device_id,
            snapshot.blocks_read,
            snapshot.state.len(),
            snapshot.duration_ms
        );
    } else if let Some(error) = &snapshot.error {
        println!(
            "[{}] ERROR — {}: {}",
            snapshot.device_id,
            error.class(),
            error
        );
    }
}

async fn run_once(mut registry: RuntimeRegistry, connect: bool) -> i32 {
    let poll = tokio::task::spawn_blocking(move || {
        let snapshots = registry.poll_all_once(connect, connect);
        (registry, snapshots)
    });

    let (registry, snapshots) = tokio::select! {
        result = poll => match result {
            Ok(parts) => parts,
            Err(err) => {
                eprintln!("Error: poll worker failed: {err}");
                return EXIT_DEVICE_ERRORS;
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted.");
            return EXIT_INTERRUPTED;
        }
    };

    // Deliver to configured sinks; devices without one share a fallback
    // memory sink so --once always retains state somewhere.
    let fallback: Arc<dyn Sink> = Arc::new(MemorySink::default());
    for snapshot in &snapshots {
        let sink = registry
            .device_sink(&snapshot.device_id)
            .unwrap_or_else(|| Arc::clone(&fallback));
        if let Err(err) = sink.write(snapshot).await {
            tracing::warn!(
                device = %snapshot.device_id,
                error = %err,
                "sink write failed"
            );
        }
    }

    for snapshot in &snapshots {
        print_snapshot(snapshot);
    }

    if snapshots.iter().any(|s| !s.ok()) {
        EXIT_DEVICE_ERRORS
    } else {
        EXIT_OK
    }
}

fn load_registry(config: &Path) -> anyhow::Result<RuntimeRegistry> {
    RuntimeRegistry::from_config(config, None, None)
        .with_context(|| format!("failed to load config {}", config.display()))
}

async fn main_runtime(config: PathBuf, dry_run: bool, once: bool, connect: bool) -> i32 {
    if !dry_run && !once {
        eprintln!("Error: specify --dry-run or --once");
        return EXIT_CONFIG;
    }

    let registry = match load_registry(&config) {
        Ok(registry) => registry,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return EXIT_CONFIG;
        }
    };

    if dry_run {
        println!("{}", format_dry_run(&registry.dry_run()));
        return EXIT_OK;
    }

    run_once(registry, connect).await
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    let code = match args.command {
        Command::Runtime {
            config,
            dry_run,
            once,
            connect,
        } => main_runtime(config, dry_run, once, connect).await,
    };
    std::process::exit(code);
}
