//! portwatchd — the portwatch daemon.
//!
//! Loads targets from a TOML file, registers each one with callbacks that
//! log the transition, and runs the monitor until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! portwatchd run --config /etc/portwatch.toml --grace-time 10 --verbose
//! portwatchd probe --host example.com --port 80
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{info, warn};

use portwatch::config::parse_duration;
use portwatch::{Monitor, PortwatchConfig, ProbeOutcome, Registration, Registry, TargetId, tcp_probe};

/// Log filter when `RUST_LOG` is unset. Per-check lines only show with
/// `--verbose`; `RUST_LOG=portwatch=debug` shows everything.
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Parser)]
#[command(
    name = "portwatchd",
    about = "portwatch — TCP reachability monitor",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Monitor every target in the config file until interrupted.
    Run {
        /// Path to portwatch.toml.
        #[arg(short, long, default_value = "portwatch.toml")]
        config: PathBuf,

        /// Override [monitor].grace_time_secs.
        #[arg(long)]
        grace_time: Option<u64>,

        /// Log every check attempt.
        #[arg(short, long)]
        verbose: bool,
    },
    /// Probe a single endpoint once and print the outcome.
    Probe {
        #[arg(long)]
        host: String,

        #[arg(long)]
        port: u16,

        /// Connect timeout, e.g. "2s" or "500ms".
        #[arg(long, default_value = "2s")]
        timeout: String,

        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            config,
            grace_time,
            verbose,
        } => run(&config, grace_time, verbose).await,
        Command::Probe {
            host,
            port,
            timeout,
            format,
        } => probe(host, port, &timeout, format).await,
    }
}

/// Load the config, applying command-line overrides.
fn load_config(path: &Path, grace_time: Option<u64>, verbose: bool) -> anyhow::Result<PortwatchConfig> {
    let mut config = PortwatchConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?;

    if let Some(secs) = grace_time {
        config.monitor.grace_time_secs = secs;
    }
    if verbose {
        config.monitor.verbose = true;
    }
    Ok(config)
}

/// Build the registry, one logging callback pair per target entry.
fn build_registry(config: &PortwatchConfig) -> Registry {
    let mut registry = Registry::new();

    for entry in &config.targets {
        let id = TargetId::new(entry.host.clone(), entry.port);
        let down_id = id.clone();
        let up_id = id;

        let mut registration = Registration::new(
            entry.host.clone(),
            entry.port,
            move || warn!(addr = %down_id, "service went down"),
            move || info!(addr = %up_id, "service went up"),
        )
        .interval_secs(entry.interval_secs);

        if let Some(window) = entry.outage {
            registration = registration.outage(window);
        }
        registry.register(registration);
    }

    registry
}

async fn run(path: &Path, grace_time: Option<u64>, verbose: bool) -> anyhow::Result<()> {
    let config = load_config(path, grace_time, verbose)?;
    let registry = build_registry(&config);

    if registry.is_empty() {
        warn!(path = %path.display(), "no targets configured");
    }

    let monitor = Monitor::from_config(&config.monitor)?;
    info!(
        targets = registry.len(),
        grace_secs = config.monitor.grace_time_secs,
        unreachable = ?config.monitor.unreachable,
        "portwatch starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let monitor_handle = tokio::spawn(monitor.run(registry, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    monitor_handle.await?;
    info!("portwatch stopped");
    Ok(())
}

async fn probe(host: String, port: u16, timeout: &str, format: Format) -> anyhow::Result<()> {
    let timeout: Duration =
        parse_duration(timeout).with_context(|| format!("invalid timeout {timeout:?}"))?;
    let id = TargetId::new(host, port);
    let outcome = tcp_probe(&id, timeout).await;

    match format {
        Format::Text => match &outcome {
            ProbeOutcome::Reachable => println!("{id}: reachable"),
            ProbeOutcome::Refused => println!("{id}: refused"),
            ProbeOutcome::Unreachable { reason } => println!("{id}: unreachable ({reason})"),
        },
        Format::Json => println!("{}", serde_json::to_string(&outcome)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn cli_parses_run() {
        let cli = Cli::try_parse_from(["portwatchd", "run", "-c", "x.toml", "--grace-time", "10", "-v"]).unwrap();
        match cli.command {
            Command::Run {
                config,
                grace_time,
                verbose,
            } => {
                assert_eq!(config, PathBuf::from("x.toml"));
                assert_eq!(grace_time, Some(10));
                assert!(verbose);
            }
            Command::Probe { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn cli_rejects_bad_port() {
        assert!(Cli::try_parse_from(["portwatchd", "probe", "--host", "a", "--port", "70000"]).is_err());
    }

    #[test]
    fn overrides_apply_over_file() {
        let file = write_config("[monitor]\ngrace_time_secs = 3\n");
        let config = load_config(file.path(), Some(10), true).unwrap();
        assert_eq!(config.monitor.grace_time_secs, 10);
        assert!(config.monitor.verbose);

        let config = load_config(file.path(), None, false).unwrap();
        assert_eq!(config.monitor.grace_time_secs, 3);
        assert!(!config.monitor.verbose);
    }

    #[test]
    fn registry_merges_duplicate_entries() {
        let file = write_config(
            r#"
[[target]]
host = "127.0.0.1"
port = 9008
interval_secs = 10

[[target]]
host = "127.0.0.1"
port = 9008
interval_secs = 5

[[target]]
host = "example.com"
port = 80
"#,
        );
        let config = load_config(file.path(), None, false).unwrap();
        let registry = build_registry(&config);

        assert_eq!(registry.len(), 2);
        let local = registry.get(&TargetId::new("127.0.0.1", 9008)).unwrap();
        assert_eq!(local.interval_secs(), 5);
        assert_eq!(local.down_callback_count(), 2);
    }
}
