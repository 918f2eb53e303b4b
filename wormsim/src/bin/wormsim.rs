//! Wormhole simulator CLI
//!
//! Runs the 18-node line scenario, or any scenario loaded from JSON, and
//! prints the per-flow report.
//!
//! # Example
//!
//! ```bash
//! # Wormholes up, monitor on, tunnels dropping data
//! wormsim --attack-policy drop
//!
//! # The same network without tunnels
//! wormsim --enable-wormhole false
//!
//! # A custom scenario, report written as JSON
//! wormsim --config scenario.json --json report.json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wormsim::{
    wormhole_line_scenario, DataPolicy, Direction, Duration, ScenarioBuilder, ScenarioConfig,
    Simulator, Timestamp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AttackPolicy {
    Forward,
    Drop,
    Delay,
}

/// Wormhole attack simulator
///
/// Deterministic for a given seed.
#[derive(Parser, Debug)]
#[command(name = "wormsim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Collect and print per-flow statistics [default: true]
    #[arg(long, action = ArgAction::Set, value_name = "BOOL")]
    enable_monitor: Option<bool>,

    /// Install the wormhole tunnels; with --config, false removes the
    /// file's tunnels [default: true]
    #[arg(long, action = ArgAction::Set, value_name = "BOOL")]
    enable_wormhole: Option<bool>,

    /// What tunnels do with data packets [default: forward]
    #[arg(long, value_enum)]
    attack_policy: Option<AttackPolicy>,

    /// Hold time for the delay policy, in milliseconds
    #[arg(long, default_value = "100")]
    attack_delay_ms: u64,

    /// Simulation stop time in seconds
    #[arg(long)]
    stop: Option<u64>,

    /// RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Load the scenario from a JSON file instead of the built-in one
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the flow report as JSON to this path
    #[arg(long)]
    json: Option<PathBuf>,

    /// Print every application reception as "time<TAB>size"
    #[arg(long)]
    trace: bool,
}

impl Args {
    fn policy(&self) -> Option<DataPolicy> {
        self.attack_policy.map(|policy| match policy {
            AttackPolicy::Forward => DataPolicy::Forward,
            AttackPolicy::Drop => DataPolicy::Drop,
            AttackPolicy::Delay => DataPolicy::Delay(Duration::from_millis(self.attack_delay_ms)),
        })
    }

    fn scenario(&self) -> Result<ScenarioConfig> {
        let mut builder = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("reading scenario {}", path.display()))?;
                let config: ScenarioConfig = serde_json::from_str(&text)
                    .with_context(|| format!("parsing scenario {}", path.display()))?;
                ScenarioBuilder::from_config(config)
            }
            None => wormhole_line_scenario(DataPolicy::Forward),
        };

        if self.enable_wormhole == Some(false) {
            builder = builder.without_tunnels();
        } else if let Some(policy) = self.policy() {
            if builder.config().tunnels.is_empty() {
                warn!("--attack-policy has no effect, the scenario has no tunnels");
            }
            builder = builder.with_attack_policy(policy);
        }
        if let Some(enabled) = self.enable_monitor {
            builder = builder.with_flow_monitor(enabled);
        }
        if self.json.is_some() {
            builder = builder.with_flow_monitor(true);
        }
        if self.trace {
            builder = builder.with_packet_trace(true);
        }
        if let Some(seed) = self.seed {
            builder = builder.with_seed(seed);
        }
        if let Some(stop) = self.stop {
            builder = builder.with_stop(Timestamp::from_secs(stop));
        }
        Ok(builder.into_config())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,wormsim=info")),
        )
        .init();

    let args = Args::parse();
    let config = args.scenario()?;

    info!(
        nodes = config.nodes,
        tunnels = config.tunnels.len(),
        flows = config.flows.len(),
        seed = config.seed,
        stop = %config.stop,
        "starting simulation"
    );

    let mut sim = Simulator::from_config(&config).context("invalid scenario")?;
    let result = sim.run();

    info!(
        end = %result.end_time,
        events = result.metrics.events_executed,
        frames = result.metrics.frames_sent,
        control = result.metrics.control_overhead(),
        "simulation finished"
    );

    if args.trace {
        for record in sim.take_trace() {
            if record.direction == Direction::Deliver {
                println!("{:.6}\t{}", record.time.as_secs_f64(), record.size);
            }
        }
    }

    let Some(report) = result.report else {
        return Ok(());
    };
    print!("{report}");

    if let Some(path) = &args.json {
        let json = report.to_json().context("serializing flow report")?;
        std::fs::write(path, json)
            .with_context(|| format!("writing flow report to {}", path.display()))?;
    }
    Ok(())
}
