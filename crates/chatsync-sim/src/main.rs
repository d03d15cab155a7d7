//! Chatsync chaos scenario runner.
//!
//! Runs seeded scenarios of the sync client against the in-memory server
//! and reports invariant violations and divergence. A failing seed can be
//! replayed exactly.
//!
//! # Usage
//!
//! ```bash
//! # 50 runs starting at seed 1000
//! chatsync-sim --seed 1000 --runs 50
//!
//! # Replay one seed with debug logging and no push correlation tokens
//! chatsync-sim --seed 1042 --no-client-ref --log-level debug
//!
//! # Client clock an hour ahead of the server
//! chatsync-sim --seed 7 --clock-skew-ms 3600000
//! ```

use std::{process::ExitCode, time::Duration};

use chatsync_core::SyncConfig;
use chatsync_harness::{ChaosConfig, Scenario};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chatsync deterministic simulation runner
#[derive(Parser, Debug)]
#[command(name = "chatsync-sim")]
#[command(about = "Run seeded chaos scenarios against the chatsync client")]
#[command(version)]
struct Args {
    /// Seed of the first run; run `i` uses `seed + i`
    #[arg(short, long, default_value = "0")]
    seed: u64,

    /// Number of runs
    #[arg(short, long, default_value = "20")]
    runs: u64,

    /// Operations per run
    #[arg(long, default_value = "200")]
    steps: usize,

    /// Rooms present before the session starts
    #[arg(long, default_value = "3")]
    rooms: usize,

    /// Peers posting into the session's rooms
    #[arg(long, default_value = "2")]
    peers: usize,

    /// Probability a push delivery is lost
    #[arg(long, default_value = "0.1")]
    drop_rate: f64,

    /// Probability a push delivery arrives twice
    #[arg(long, default_value = "0.1")]
    duplicate_rate: f64,

    /// Probability a push delivery is held behind the next one
    #[arg(long, default_value = "0.2")]
    reorder_rate: f64,

    /// Probability a send call fails
    #[arg(long, default_value = "0.05")]
    send_failure_rate: f64,

    /// Strip correlation tokens from push echoes
    #[arg(long)]
    no_client_ref: bool,

    /// Milliseconds the client's wall clock runs ahead of the server (negative: behind)
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    clock_skew_ms: i64,

    /// Send timeout in milliseconds
    #[arg(long, default_value = "15000")]
    send_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn scenario(&self, seed: u64) -> Scenario {
        Scenario {
            seed,
            steps: self.steps,
            chaos: ChaosConfig {
                drop_rate: self.drop_rate,
                duplicate_rate: self.duplicate_rate,
                reorder_rate: self.reorder_rate,
                send_failure_rate: self.send_failure_rate,
                echo_client_ref: !self.no_client_ref,
                client_clock_skew_ms: self.clock_skew_ms,
            },
            config: SyncConfig {
                send_timeout: Duration::from_millis(self.send_timeout_ms),
                ..SyncConfig::default()
            },
            initial_rooms: self.rooms,
            peers: self.peers,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!(seed = args.seed, runs = args.runs, steps = args.steps, "starting simulation");

    let mut failed = Vec::new();
    for offset in 0..args.runs {
        let seed = args.seed.wrapping_add(offset);
        let report = args.scenario(seed).run();
        if report.is_success() {
            tracing::info!(
                seed,
                sent = report.sent,
                peer_posts = report.peer_posts,
                disconnects = report.disconnects,
                unrecognized = report.unrecognized,
                "run converged"
            );
        } else {
            tracing::error!("run failed\n{report}");
            failed.push(seed);
        }
    }

    if failed.is_empty() {
        tracing::info!(runs = args.runs, "all runs converged");
        ExitCode::SUCCESS
    } else {
        tracing::error!(?failed, "failing seeds");
        ExitCode::FAILURE
    }
}
