//! Operator CLI for the warden governor.
//!
//! `warden defaults` prints a safeguard configuration template.
//! `warden simulate` drives a governor with simulated completion calls so
//! operators can watch the safeguards engage before wiring up a real
//! provider.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use warden_core::{DenyReason, Governor, GovernorError, ProviderError, SafeguardConfig};

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Admission control and failure isolation for completion-API calls"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default safeguard configuration as YAML
    Defaults,

    /// Run simulated completion calls through a governor and report status
    Simulate {
        /// Number of calls to submit
        #[arg(long, default_value_t = 20)]
        requests: usize,

        /// Probability that a simulated call fails (0.0 - 1.0)
        #[arg(long, default_value_t = 0.2)]
        failure_rate: f64,

        /// Simulated provider latency in milliseconds
        #[arg(long, default_value_t = 150)]
        latency_ms: u64,

        /// RNG seed, for reproducible runs
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Safeguard configuration file (YAML); defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Trigger an emergency stop after this many submissions
        #[arg(long)]
        stop_after: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Defaults => defaults(),
        Commands::Simulate {
            requests,
            failure_rate,
            latency_ms,
            seed,
            config,
            stop_after,
        } => {
            simulate(
                requests,
                failure_rate,
                latency_ms,
                seed,
                config,
                stop_after,
            )
            .await
        }
    }
}

fn defaults() -> Result<()> {
    let yaml = serde_yaml::to_string(&SafeguardConfig::default())?;
    print!("{yaml}");
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<SafeguardConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: SafeguardConfig =
                serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        }
        None => Ok(SafeguardConfig::default()),
    }
}

#[derive(Default)]
struct Tally {
    completed: usize,
    provider_failures: usize,
    denied: usize,
    queue_full: usize,
    cancelled: usize,
}

async fn simulate(
    requests: usize,
    failure_rate: f64,
    latency_ms: u64,
    seed: u64,
    config: Option<PathBuf>,
    stop_after: Option<usize>,
) -> Result<()> {
    let config = load_config(config)?;
    let governor: Governor<String> = Governor::new(config).context("invalid safeguards")?;

    let rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
    let latency = Duration::from_millis(latency_ms);

    let mut handles = Vec::with_capacity(requests);
    for index in 0..requests {
        let governor_task = governor.clone();
        let rng = Arc::clone(&rng);
        handles.push(tokio::spawn(async move {
            governor_task
                .submit(move || {
                    let rng = Arc::clone(&rng);
                    async move {
                        tokio::time::sleep(latency).await;
                        let roll: f64 = rng.lock().gen();
                        if roll < failure_rate {
                            Err(ProviderError::Other("simulated provider failure".into()))
                        } else {
                            Ok(format!("completion-{index}"))
                        }
                    }
                })
                .await
        }));
        // Let the submission reach the governor before the next arrives.
        tokio::task::yield_now().await;

        if stop_after == Some(index + 1) {
            let stopped_at = governor.emergency_stop();
            println!(
                "{}",
                serde_json::json!({ "timestamp": stopped_at.to_rfc3339() })
            );
        }
    }

    let mut tally = Tally::default();
    for handle in handles {
        match handle.await? {
            Ok(_) => tally.completed += 1,
            Err(GovernorError::Provider(_)) => tally.provider_failures += 1,
            Err(GovernorError::AdmissionDenied { reason, .. }) => {
                tally.denied += 1;
                if reason == DenyReason::CircuitOpen {
                    tracing::info!("call shed by open circuit");
                }
            }
            Err(GovernorError::QueueFull { .. }) => tally.queue_full += 1,
            Err(GovernorError::Cancelled) => tally.cancelled += 1,
        }
    }

    println!(
        "completed={} provider_failures={} denied={} queue_full={} cancelled={}",
        tally.completed, tally.provider_failures, tally.denied, tally.queue_full, tally.cancelled
    );
    println!("{}", serde_json::to_string_pretty(&governor.status())?);
    Ok(())
}
