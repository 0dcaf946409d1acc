mod sim;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use framekeeper_common::QosConfig;
use tracing_subscriber::EnvFilter;

use crate::sim::SimulationParams;

#[derive(Parser)]
#[command(name = "framekeeper-cli", about = "CLI tool for framekeeper scheduling")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print a configuration as JSON (defaults unless a file is given)
    Config {
        /// JSON file to validate and print in sanitized form
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Drive the scheduler through a synthetic session
    Simulate {
        /// Number of simulation ticks
        #[arg(short, long, default_value = "100")]
        ticks: u64,
        /// Block edits generated per tick
        #[arg(short, long, default_value = "16")]
        edits_per_tick: u32,
        /// Nominal render frame time in milliseconds
        #[arg(short, long, default_value = "8.0")]
        frame_ms: f64,
        /// Observer speed in blocks per tick
        #[arg(long, default_value = "0.3")]
        speed: f64,
        /// Observer turn rate in degrees per tick
        #[arg(long, default_value = "1.5")]
        turn_deg: f64,
        /// RNG seed for the edit generator
        #[arg(long, default_value = "42")]
        seed: u64,
        /// JSON configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn load_config(path: &Path) -> anyhow::Result<QosConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: QosConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;
    if let Err(err) = config.validate() {
        tracing::warn!(%err, "configuration out of range, clamping");
    }
    Ok(config.sanitized())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("framekeeper-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", framekeeper_common::crate_info());
            println!("qos: {}", framekeeper_qos::crate_info());
            println!("stream: {}", framekeeper_stream::crate_info());
            println!("tasks: {}", framekeeper_tasks::crate_info());
            println!("runtime: {}", framekeeper_runtime::crate_info());
        }
        Commands::Config { file } => {
            let config = match file {
                Some(path) => load_config(&path)?,
                None => QosConfig::default(),
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Simulate {
            ticks,
            edits_per_tick,
            frame_ms,
            speed,
            turn_deg,
            seed,
            config,
        } => {
            let config = match config {
                Some(path) => load_config(&path)?,
                None => QosConfig::default(),
            };
            println!(
                "Simulation: ticks={ticks}, edits/tick={edits_per_tick}, \
                 frame={frame_ms}ms, seed={seed}"
            );
            let params = SimulationParams {
                ticks,
                edits_per_tick,
                frame_ms,
                speed,
                turn_degrees: turn_deg,
                seed,
            };
            let totals = sim::run(config, &params);

            println!();
            println!("edits:              {}", totals.edits);
            println!("rerenders deferred: {}", totals.rerenders_deferred);
            println!("rebuilds:           {}", totals.rebuilds);
            println!("unhidden:           {}", totals.unhidden);
            println!("deferred:           {}", totals.deferred);
            println!("debounced:          {}", totals.debounced);
            println!("long frames:        {}", totals.long_frames);
            println!("sections culled:    {}", totals.sections_culled);
            println!("regions cancelled:  {}", totals.regions_cancelled);
            println!("block ents culled:  {}", totals.block_entities_culled);
            println!("particles admitted: {}", totals.particles_admitted);
            println!("particles rejected: {}", totals.particles_rejected);
            println!("tasks processed:    {}", totals.tasks_processed);
            println!(
                "frame time:         p50 {:.2}ms, p95 {:.2}ms, worst {:.2}ms over {} frames",
                totals.frame_p50_ms, totals.frame_p95_ms, totals.frame_worst_ms, totals.frames
            );
        }
    }

    Ok(())
}
