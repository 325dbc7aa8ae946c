//! Level Monitoring Service - Main Daemon
//!
//! Periodically measures a liquid level with an ultrasonic sensor, appends
//! every reading to a CSV log, and sends an SMS when the configured policy
//! is violated, at most once per cooldown period.
//!
//! Usage:
//!   levmon_service                          # loop using ./levmon.toml
//!   levmon_service --config /etc/levmon.toml
//!   levmon_service --once                   # single cycle (cron)
//!   levmon_service --dry-run                # log alerts instead of sending SMS
//!   levmon_service --endpoint 8000          # also serve the status endpoint
//!
//! Environment:
//!   TWILIO_AUTH_TOKEN - Twilio auth token if not in the config file (.env honored)
//!   RUST_LOG          - log filter (default: levmon_service=info)

use levmon_service::config::{self, DEFAULT_CONFIG_PATH};
use levmon_service::daemon::Daemon;
use levmon_service::endpoint::{self, EndpointContext};
use levmon_service::storage::InstanceLock;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

struct Args {
    config_path: PathBuf,
    once: bool,
    dry_run: bool,
    endpoint_port: Option<u16>,
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args {
        config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        once: false,
        dry_run: false,
        endpoint_port: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                let path = args.get(i + 1).ok_or("--config requires a path")?;
                parsed.config_path = PathBuf::from(path);
                i += 2;
            }
            "--endpoint" => {
                let port = args
                    .get(i + 1)
                    .and_then(|p| p.parse().ok())
                    .ok_or("--endpoint requires a port number")?;
                parsed.endpoint_port = Some(port);
                i += 2;
            }
            "--once" => {
                parsed.once = true;
                i += 1;
            }
            "--dry-run" => {
                parsed.dry_run = true;
                i += 1;
            }
            other => {
                return Err(format!(
                    "Unknown argument: {}\nUsage: {} [--config PATH] [--once] [--dry-run] [--endpoint PORT]",
                    other, args[0]
                ));
            }
        }
    }

    Ok(parsed)
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "levmon_service=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        }
    };

    // Configuration errors are fatal before the loop starts
    let config = match config::load_config(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(path = %args.config_path.display(), error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let _lock = match InstanceLock::acquire(&config.storage.state_path) {
        Ok(lock) => lock,
        Err(e) => {
            tracing::error!(error = %e, "another instance is running");
            return ExitCode::FAILURE;
        }
    };

    if let Some(port) = args.endpoint_port {
        let ctx = EndpointContext {
            name: config.policy.name.clone(),
            results_path: config.storage.results_path.clone(),
            state_path: config.storage.state_path.clone(),
        };
        std::thread::spawn(move || {
            if let Err(e) = endpoint::start_endpoint_server(port, ctx) {
                tracing::error!(error = %e, "endpoint server error");
            }
        });
    }

    let mut daemon = match Daemon::from_config(config, args.dry_run) {
        Ok(daemon) => daemon,
        Err(e) => {
            tracing::error!(error = %e, "initialization failed");
            return ExitCode::FAILURE;
        }
    };

    let result = if args.once {
        daemon.run_cycle(chrono::Utc::now()).map(|report| {
            tracing::info!(
                value = report.value,
                outcome = report.outcome.label(),
                "cycle complete"
            );
        })
    } else {
        daemon.run()
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "daemon stopped");
            ExitCode::FAILURE
        }
    }
}
