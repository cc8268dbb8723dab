mod app;
mod cli;
mod config;
mod script;
mod telemetry;

use anchor_lifecycle::ManagerConfig;
use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::app::Simulation;
use crate::cli::Cli;
use crate::config::SimConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::logging::init(&cli.logging.to_config())?;

    let config = SimConfig::resolve(&cli)?;
    let manager_config =
        config.manager_config(ManagerConfig::from_env().context("reading ANCHOR_* environment")?);
    info!(
        target: "anchor_sim",
        flow = ?cli.flow,
        frame_ms = config.frame_ms,
        latency_ticks = config.latency_ticks,
        steps = config.steps.len(),
        "starting simulation"
    );

    let summary = Simulation::new(config, manager_config, std::io::stdout())?
        .run()
        .await?;
    info!(
        target: "anchor_sim",
        frames = summary.frames,
        completions = summary.completions,
        mode = %summary.mode,
        "simulation finished"
    );
    Ok(())
}
