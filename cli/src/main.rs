//! `lanefollow` CLI: replay recorded inputs, check and dump configuration.

mod replay;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lanefollow_core::{CycleContext, LaneFollowingSystem, SystemConfig};
use replay::{load_replay, save_json, ReplaySource, RunReport};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "lanefollow", about = "Lane-following controller CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a recorded input log through the controller.
    Run {
        /// Path to the input log (JSON)
        input: PathBuf,
        /// Configuration file; defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write per-cycle outputs to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Load and validate a configuration file.
    CheckConfig {
        config: PathBuf,
    },
    /// Print the default configuration as JSON.
    DumpConfig,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            input,
            config,
            output,
        } => {
            run(&input, config.as_deref(), output.as_deref())?;
        }
        Commands::CheckConfig { config } => {
            SystemConfig::from_json_file(&config)
                .with_context(|| format!("invalid configuration {}", config.display()))?;
            println!("{}: ok", config.display());
        }
        Commands::DumpConfig => {
            println!("{}", serde_json::to_string_pretty(&SystemConfig::default())?);
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<SystemConfig> {
    match path {
        Some(p) => SystemConfig::from_json_file(p)
            .with_context(|| format!("invalid configuration {}", p.display())),
        None => Ok(SystemConfig::default()),
    }
}

fn run(input: &Path, config_path: Option<&Path>, output_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let log = load_replay(input).with_context(|| format!("reading {}", input.display()))?;
    let name = log.name.clone();
    println!("Replaying '{}' ({} frames)...", name, log.frames.len());

    let mut system = LaneFollowingSystem::new(config)?;
    let mut source = ReplaySource::new(log);
    let mut ctx = CycleContext::default();
    let mut outputs = Vec::new();

    let start = std::time::Instant::now();
    let cycles = system.run(&mut source, &mut ctx, |out| outputs.push(out));
    let elapsed = start.elapsed();

    println!(
        "Done: {} cycles, {} faults, {} overruns, elapsed={:.3}s{}",
        cycles,
        ctx.fault_count,
        ctx.overrun_count,
        elapsed.as_secs_f64(),
        if ctx.stop_requested {
            " (stopped on collision)"
        } else {
            ""
        },
    );

    if let Some(opath) = output_path {
        let report = RunReport {
            name,
            cycles,
            faults: ctx.fault_count,
            overruns: ctx.overrun_count,
            stopped_on_collision: ctx.stop_requested,
            outputs,
        };
        save_json(&report, opath)?;
        println!("Outputs saved to {}", opath.display());
    }

    Ok(())
}
