//! main.rs — Petal simulator entry point
//!
//! Builds a synthetic hexagonal array of positioners, drives the
//! anticollision scheduler through seeded random target batches against a
//! simulated petalcontroller, and reports what happened: per-batch outcomes
//! on the log, schedule statistics as CSV, and optionally an animation frame
//! dump of the first batch for offline inspection.

mod grid;
mod targets;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use fp_types::{HardwareTable, SendResponse};
use petal_core::{
    Animator, AnticollisionMode, ColliderConfig, MemoryStateStore, MoveCommand, Petal,
    PetalConfig, PetalTransport,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "petal-sim", about = "Fiber-positioner anticollision scheduler simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// RNG seed; identical seeds reproduce identical batches
    #[arg(long, default_value = "20190131")]
    seed: u64,
    /// Number of schedule batches to run
    #[arg(long, default_value = "5")]
    batches: usize,
    /// Anticollision mode: none, freeze, adjust, adjust-requested
    #[arg(long, default_value = "adjust")]
    mode: String,
    /// Where to write schedule statistics CSV
    #[arg(long, default_value = "schedule_stats.csv")]
    stats_csv: PathBuf,
    /// Dump animation frames of the first batch into this directory
    #[arg(long)]
    animate: Option<PathBuf>,
    /// Inject a transport failure on the final batch: power-off or bus-off
    #[arg(long)]
    fail: Option<String>,
}

fn parse_mode(s: &str) -> anyhow::Result<AnticollisionMode> {
    Ok(match s {
        "none" => AnticollisionMode::None,
        "freeze" => AnticollisionMode::Freeze,
        "adjust" => AnticollisionMode::Adjust,
        "adjust-requested" => AnticollisionMode::AdjustRequestedOnly,
        other => bail!("unknown anticollision mode '{other}'"),
    })
}

// ── Simulated petalcontroller ─────────────────────────────────────────────────

/// Acknowledges every table; optionally scripted to fail a chosen batch, to
/// exercise the batch-failure taxonomy end to end.
struct SimTransport {
    batch_counter: usize,
    fail_at: Option<(usize, SendResponse)>,
}

impl PetalTransport for SimTransport {
    fn send_and_sync(&mut self, tables: &[HardwareTable], _timeout: Duration) -> SendResponse {
        self.batch_counter += 1;
        if let Some((batch, response)) = &self.fail_at {
            if self.batch_counter == *batch {
                warn!("sim transport: injecting {response:?}");
                return response.clone();
            }
        }
        info!(
            tables = tables.len(),
            total_ms = tables.iter().map(|t| t.total_time_ms()).max().unwrap_or(0),
            "sim transport: batch delivered, sync issued"
        );
        SendResponse::Success
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, serde::Deserialize)]
struct FullConfig {
    array: grid::ArrayConfig,
    schedule: ScheduleConfig,
    collider: ColliderConfig,
}

#[derive(Debug, serde::Deserialize)]
struct ScheduleConfig {
    /// Share of the array that gets a target each batch
    target_fraction: f64,
    /// Animation frame interval, seconds
    animator_timestep: f64,
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "petal_sim=info,petal_core=info".into()),
        )
        .init();

    let args = Args::parse();
    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let cfg: FullConfig = toml::from_str(&config_str).context("invalid config.toml")?;
    let mode = parse_mode(&args.mode)?;

    let mut rng = StdRng::seed_from_u64(args.seed);
    let states = grid::build_array(&cfg.array, &mut rng);
    info!(
        "petal-sim starting — {}×{} array, {:.1} mm pitch, {} batches, mode {:?}",
        cfg.array.nx, cfg.array.ny, cfg.array.pitch_mm, args.batches, mode
    );

    let fail_at = match args.fail.as_deref() {
        None => None,
        Some("power-off") => Some((
            args.batches,
            SendResponse::FailPowerOff { supplies: vec!["PS1".to_string()] },
        )),
        Some("bus-off") => Some((args.batches, SendResponse::FailBusOff { buses: vec![0] })),
        Some(other) => bail!("unknown failure injection '{other}'"),
    };

    let mut petal = Petal::new(
        PetalConfig { anticollision: mode, ..PetalConfig::default() },
        cfg.collider,
        Box::new(MemoryStateStore::new(states.clone())),
        Box::new(SimTransport { batch_counter: 0, fail_at }),
    )
    .map_err(anyhow::Error::msg)?;

    for batch in 1..=args.batches {
        let id = petal.begin_schedule();
        let requests = targets::draw_batch(&states, cfg.schedule.target_fraction, &mut rng);
        let mut accepted = 0usize;
        for req in &requests {
            match petal.request_target(&req.posid, MoveCommand::PoslocXY, req.x, req.y, "sim batch")
            {
                Ok(_) => accepted += 1,
                Err(e) => warn!(posid = req.posid.as_str(), "request rejected: {e}"),
            }
        }

        let outcome = petal.schedule_moves().map_err(anyhow::Error::msg)?;
        info!(
            schedule = id.as_str(),
            requested = requests.len(),
            accepted,
            collisions = outcome.collisions_found,
            iters = outcome.adjustment_iters,
            frozen = outcome.not_reached.len(),
            "batch {batch} scheduled"
        );
        for (posid, err) in &outcome.errors {
            warn!(posid = posid.as_str(), "schedule error: {err:?}");
        }

        if batch == 1 {
            if let Some(dir) = &args.animate {
                let mut animator = Animator::new(cfg.schedule.animator_timestep);
                petal.render_schedule(&mut animator).map_err(anyhow::Error::msg)?;
                let frames = animator.write_frames(dir).map_err(anyhow::Error::msg)?;
                info!(frames, dir = %dir.display(), "animation dumped");
            }
        }

        match petal.send_and_execute_moves() {
            Ok(summary) => {
                info!(
                    updated = summary.updated.len(),
                    failures = summary.failures.len(),
                    "batch {batch} executed"
                );
            }
            Err(e) => {
                // batch-level failure: nothing moved, nothing was updated
                warn!("batch {batch} aborted: {e}");
            }
        }
    }

    petal.save_stats_csv(&args.stats_csv).map_err(anyhow::Error::msg)?;
    info!(path = %args.stats_csv.display(), "schedule stats written");
    Ok(())
}
