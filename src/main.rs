//! Headless session runner against simulated hardware.
//!
//! Runs a full session from a TOML config, auto-confirming each turn, with
//! progress on stderr via `tracing`. Useful for protocol dry-runs and for
//! exercising timing parameters without a rig.

use anyhow::Context;
use clap::Parser;
use imagery_daq::config::ExperimentConfig;
use imagery_daq::experiment::{EngineEvent, ExperimentEngine, ExperimentState};
use imagery_daq::hardware::sim::SimHardwareFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "imagery-daq", about = "Run a simulated imagery session", version)]
struct Cli {
    /// TOML configuration file; missing file means built-in defaults.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Comma-separated participant identifiers.
    #[arg(long, value_delimiter = ',', default_value = "participant1")]
    subjects: Vec<String>,

    /// Display to present on.
    #[arg(long, default_value_t = 0)]
    screen: usize,

    /// Override the configured output base directory.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Simulated display refresh rate in Hz.
    #[arg(long, default_value_t = 60.0)]
    refresh_hz: f64,

    /// Run swaps at full speed instead of pacing them in wall time.
    #[arg(long)]
    fast: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ExperimentConfig::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(output) = cli.output {
        config.output_base_dir = output;
    }
    config.validate().context("invalid configuration")?;

    let mut factory = SimHardwareFactory::new(cli.refresh_hz, config.audio.clone());
    if !cli.fast {
        factory = factory.realtime();
    }

    let mut engine = ExperimentEngine::new(config, Arc::new(factory));
    engine
        .setup(cli.subjects, cli.screen)
        .context("session setup failed")?;
    if let Some(dir) = engine.session_dir() {
        info!(dir = %dir.display(), "session output directory");
    }
    let handle = engine.handle();
    let events = engine.events();
    engine.start().context("starting session failed")?;

    for event in events.iter() {
        match event {
            EngineEvent::StateChanged(state) => {
                info!(%state, "state changed");
                if state == ExperimentState::WaitingConfirm {
                    handle.confirm_next();
                }
            }
            EngineEvent::PhaseChanged {
                phase,
                remaining_secs,
            } => info!(%phase, remaining_secs, "phase"),
            EngineEvent::StimulusUpdate(name) => info!(stimulus = %name, "presenting"),
            EngineEvent::BeepProgress { current, total } => {
                info!(current, total, "beep progress");
            }
            EngineEvent::ProgressText(text) => info!("{text}"),
            EngineEvent::QueueAdvanced { index } => info!(index, "queue advanced"),
            EngineEvent::TrialFinished {
                subject,
                stimulus,
                repetition,
                status,
            } => info!(%subject, %stimulus, repetition, %status, "trial finished"),
            EngineEvent::RecordingDiscarded(path) => {
                info!(path = %path.display(), "recording discarded");
            }
            EngineEvent::ErrorOccurred(message) => warn!(%message, "session error"),
            EngineEvent::SessionFinished => break,
        }
    }

    let final_state = engine.join();
    info!(state = %final_state, "session finished");
    if final_state == ExperimentState::Error {
        anyhow::bail!("session ended in error state");
    }
    Ok(())
}
