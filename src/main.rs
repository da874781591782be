//! notefx CLI - run MIDI note effects over files or live devices

use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use notefx_lib::config::Config;
use notefx_lib::midi::device::{self, InputDevice, OutputDevice};
use notefx_lib::midi::{InputQueue, LiveRunner};
use notefx_lib::replay;
use notefx_lib::transport::Cycle;

#[derive(Parser)]
#[command(name = "notefx")]
#[command(about = "Beat-synchronous MIDI note effects", long_about = None)]
struct Cli {
    /// JSON config selecting the effect and its settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a MIDI file through the effect
    Replay {
        /// Input .mid file
        input: PathBuf,

        /// Output .mid file
        output: PathBuf,

        /// Block size in beats (overrides the config)
        #[arg(short, long)]
        block_beats: Option<f64>,

        /// Cycle region start in beats
        #[arg(long, requires = "cycle_right")]
        cycle_left: Option<f64>,

        /// Cycle region end in beats
        #[arg(long, requires = "cycle_left")]
        cycle_right: Option<f64>,

        /// Times the cycle region plays
        #[arg(long, default_value = "2")]
        passes: u32,
    },

    /// List MIDI input and output ports
    Devices,

    /// Process a live MIDI input into an output port
    Live {
        /// Input port index (see `devices`)
        #[arg(short, long)]
        input: usize,

        /// Output port index (see `devices`)
        #[arg(short, long)]
        output: usize,

        /// Tempo in BPM (overrides the config)
        #[arg(long)]
        bpm: Option<f64>,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).map_err(anyhow::Error::msg),
        None => {
            log::info!("No config given, using defaults");
            Ok(Config::default())
        }
    }
}

fn run_replay(
    config: &Config,
    input: &Path,
    output: &Path,
    cycle: Option<Cycle>,
) -> Result<()> {
    let rendered = replay::replay_file(input, output, config, cycle).map_err(anyhow::Error::msg)?;
    println!(
        "Rendered {} input events into {} messages ({} blocks) -> {}",
        rendered.input_events,
        rendered.messages.len(),
        rendered.blocks,
        output.display()
    );
    Ok(())
}

fn list_devices() -> Result<()> {
    let inputs = device::list_inputs().map_err(anyhow::Error::msg)?;
    let outputs = device::list_outputs().map_err(anyhow::Error::msg)?;

    println!("Inputs:");
    for port in &inputs {
        println!("  {}: {}", port.index, port.name);
    }
    println!("Outputs:");
    for port in &outputs {
        println!("  {}: {}", port.index, port.name);
    }
    if inputs.is_empty() && outputs.is_empty() {
        println!("  (no MIDI ports found)");
    }
    Ok(())
}

fn run_live(config: &Config, config_path: Option<&Path>, input: usize, output: usize) -> Result<()> {
    let queue = Arc::new(InputQueue::new(config.transport.queue_capacity));
    let output = OutputDevice::connect(output).map_err(anyhow::Error::msg)?;
    let input = InputDevice::connect(input, Arc::clone(&queue)).map_err(anyhow::Error::msg)?;

    println!("{} -> {}", input.name(), output.name());
    println!("Enter: quit, p: play/stop, r: reload config");

    let runner = LiveRunner::start(config, queue, Box::new(output));

    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        match line.trim() {
            "" | "q" => break,
            "p" => {
                let playing = !runner.is_playing();
                runner.set_playing(playing);
                println!("{}", if playing { "Playing" } else { "Stopped" });
            }
            "r" => match config_path {
                Some(path) => match Config::load(path) {
                    Ok(reloaded) => runner.update_effect(reloaded.effect),
                    Err(e) => log::warn!("{}", e),
                },
                None => println!("No config file to reload"),
            },
            other => println!("Unknown command: {:?}", other),
        }
    }

    // Input closes before the runner silences the output
    drop(input);
    drop(runner);
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Replay {
            input,
            output,
            block_beats,
            cycle_left,
            cycle_right,
            passes,
        } => {
            if let Some(block_beats) = block_beats {
                config.transport.block_beats = block_beats;
                config = config.sanitized();
            }

            let cycle = match (cycle_left, cycle_right) {
                (Some(left), Some(right)) => {
                    if right <= left {
                        bail!("Cycle end {} must be after its start {}", right, left);
                    }
                    Some(Cycle {
                        left,
                        right,
                        passes,
                    })
                }
                _ => None,
            };

            run_replay(&config, &input, &output, cycle)
        }
        Commands::Devices => list_devices(),
        Commands::Live { input, output, bpm } => {
            if let Some(bpm) = bpm {
                config.transport.bpm = bpm;
                config = config.sanitized();
            }
            run_live(&config, cli.config.as_deref(), input, output)
        }
    }
}
