//! demeterd - Demeter tag watchdog daemon
//!
//! Loads `conf.json`, sets up logging, then polls Neo4j for Demeter tags
//! until interrupted.
//!
//! Exit codes:
//! - 0: stopped by a signal
//! - 1: log file or runtime setup failed
//! - 2: configuration file could not be read
//! - 3: configuration file is malformed or invalid

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use demeter_core::config::{Config, DEFAULT_CONFIG_PATH, LogFormat};
use demeter_core::error::{Error, format_error_with_remediation};
use demeter_core::logging::init_logging;
use demeter_core::{HttpSessionProvider, Watchdog, WatchdogStats};
use tokio::sync::watch;
use tracing::{info, warn};

const EXIT_SETUP: u8 = 1;
const EXIT_CONFIG_UNREADABLE: u8 = 2;
const EXIT_CONFIG_INVALID: u8 = 3;

/// Demeter tag watchdog
#[derive(Parser, Debug)]
#[command(name = "demeterd")]
#[command(about = "Watches a Neo4j imaging database for Demeter tags and runs the grouping", long_about = None)]
#[command(version)]
struct Cli {
    /// Print info level logs to stdout
    #[arg(long)]
    verbose: bool,

    /// Refresh rate of the watchdog in milliseconds (applied when > 1)
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    refresh: i64,

    /// Configuration file path
    #[arg(short, long, env = "DEMETER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log file path (overrides logging.file)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Log format: pretty or json (overrides logging.format)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Do not print the greeting banner
    #[arg(long)]
    no_banner: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load_from(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            let code = if err.is_unreadable() {
                EXIT_CONFIG_UNREADABLE
            } else {
                EXIT_CONFIG_INVALID
            };
            eprintln!("{}", format_error_with_remediation(&Error::Config(err)));
            return ExitCode::from(code);
        }
    };

    let refresh_changed = apply_cli_overrides(&cli, &mut config);

    if let Err(err) = init_logging(&config.logging) {
        eprintln!("{}", format_error_with_remediation(&Error::Logging(err)));
        return ExitCode::from(EXIT_SETUP);
    }

    if refresh_changed {
        info!(refresh_ms = cli.refresh, "Refresh rate was changed");
    }

    if !cli.no_banner {
        print_banner(&config);
    }

    match run(config).await {
        Ok(stats) => {
            info!(
                cycles = stats.cycles,
                invocations = stats.invocations,
                invocation_failures = stats.invocation_failures,
                scan_failures = stats.scan_failures,
                session_failures = stats.session_failures,
                "demeterd stopped"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "demeterd failed");
            eprintln!("Error: {err:#}");
            ExitCode::from(EXIT_SETUP)
        }
    }
}

/// Layer command-line flags over the loaded file. Returns whether the
/// refresh rate was replaced.
fn apply_cli_overrides(cli: &Cli, config: &mut Config) -> bool {
    // The flag can only turn verbose output on.
    config.logging.verbose |= cli.verbose;
    if let Some(path) = cli.log_file.clone() {
        config.logging.file = Some(path);
    }
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.apply_refresh_override(cli.refresh)
}

async fn run(config: Config) -> anyhow::Result<WatchdogStats> {
    let params = config
        .connection_params()
        .context("resolving the Neo4j endpoint")?;
    let provider = Arc::new(HttpSessionProvider::new(params));
    let mut watchdog = Watchdog::new(config.watchdog_config(), provider);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let stats = watchdog.run(shutdown_rx).await;

    let snapshot = watchdog.tracker().snapshot();
    if !snapshot.suppressed.is_empty() {
        warn!(
            suppressed = ?snapshot.suppressed,
            "Applications suppressed during this run"
        );
    }
    Ok(stats)
}

/// Resolve on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, finishing the current cycle"),
        () = terminate => info!("Received terminate signal, finishing the current cycle"),
    }
}

fn print_banner(config: &Config) {
    println!(
        r"
  ____                        _
 |  _ \  ___ _ __ ___   ___| |_ ___ _ __
 | | | |/ _ \ '_ ` _ \ / _ \ __/ _ \ '__|
 | |_| |  __/ | | | | |  __/ ||  __/ |
 |____/ \___|_| |_| |_|\___|\__\___|_|

  Light-weight daemon for Demeter's automation
  Version: {}  (LGPL v3)

  Options:
    --verbose        Print info level logs to stdout
    --refresh <ms>   Set a refresh rate for the daemon
    --config <path>  Configuration file (default conf.json)

  Project: https://github.com/Makunda/Demeter

  Watches the Neo4j database for Demeter tags and groups the
  tagged objects of each application.

  Status: watching {} every {} ms
",
        demeter_core::VERSION,
        config.neo4j.url,
        config.refresh_rate,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use demeter_core::config::ConfigFormat;
    use std::time::Duration;

    fn config_with(logging: &str) -> Config {
        let document = format!(
            r#"{{
                "neo4j": {{
                    "url": "http://localhost:7474",
                    "username": "neo4j",
                    "password": "imaging",
                    "encrypted": false
                }},
                "refreshRate": 5000,
                "logging": {logging}
            }}"#
        );
        Config::parse(&document, ConfigFormat::Json).unwrap()
    }

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn refresh_defaults_to_minus_one() {
        let cli = Cli::parse_from(["demeterd"]);
        assert_eq!(cli.refresh, -1);
        assert_eq!(cli.config, PathBuf::from("conf.json"));
        assert!(!cli.verbose);
    }

    #[test]
    fn negative_refresh_is_accepted() {
        let cli = Cli::parse_from(["demeterd", "--refresh", "-5", "--verbose"]);
        assert_eq!(cli.refresh, -5);
        assert!(cli.verbose);
    }

    #[test]
    fn log_format_parses() {
        let cli = Cli::parse_from(["demeterd", "--log-format", "json"]);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn refresh_flag_replaces_configured_rate() {
        let mut config = config_with("{}");
        let cli = Cli::parse_from(["demeterd", "--refresh", "2000"]);
        assert!(apply_cli_overrides(&cli, &mut config));
        assert_eq!(config.refresh_rate(), Duration::from_millis(2000));
        assert_eq!(config.watchdog_config().refresh_interval, Duration::from_millis(2000));
    }

    #[test]
    fn refresh_flag_of_one_keeps_configured_rate() {
        let mut config = config_with("{}");
        let cli = Cli::parse_from(["demeterd", "--refresh", "1"]);
        assert!(!apply_cli_overrides(&cli, &mut config));
        assert_eq!(config.refresh_rate(), Duration::from_millis(5000));

        let cli = Cli::parse_from(["demeterd"]);
        assert!(!apply_cli_overrides(&cli, &mut config));
        assert_eq!(config.refresh_rate(), Duration::from_millis(5000));
    }

    #[test]
    fn configured_verbose_survives_without_flag() {
        let mut config = config_with(r#"{"verbose": true}"#);
        apply_cli_overrides(&Cli::parse_from(["demeterd"]), &mut config);
        assert!(config.logging.verbose);

        let mut config = config_with("{}");
        apply_cli_overrides(&Cli::parse_from(["demeterd", "--verbose"]), &mut config);
        assert!(config.logging.verbose);
    }

    #[test]
    fn log_flags_override_logging_section() {
        let mut config = config_with(r#"{"format": "pretty", "file": "logs/demeter.log"}"#);
        let cli = Cli::parse_from([
            "demeterd",
            "--log-file",
            "/tmp/other.log",
            "--log-format",
            "json",
        ]);
        apply_cli_overrides(&cli, &mut config);
        assert_eq!(config.logging.file, Some(PathBuf::from("/tmp/other.log")));
        assert_eq!(config.logging.format, LogFormat::Json);
    }
}
