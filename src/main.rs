// Copyright 2026 Stimgen Contributors
// SPDX-License-Identifier: Apache-2.0

//! Stimgen command-line tool
//!
//! Checks, compiles and dry-runs stimulation patterns stored as JSON or
//! YAML files.
//!
//! # Usage
//!
//! ```bash
//! # Check a pattern against the configured safety limits
//! stimgen check pattern.yaml
//!
//! # Print the compiled event list
//! stimgen compile pattern.yaml --format json
//!
//! # Play a pattern on the simulated device
//! stimgen simulate pattern.yaml
//!
//! # Convert a trigger-protocol parameter file into a pattern
//! stimgen protocol params.json
//! ```

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stimgen::hardware::SimulatedAdapter;
use stimgen::pattern::{flatten_duration, seconds_to_ns, PatternNode, TriggerProtocol, NS_PER_S};
use stimgen::safety::Verdict;
use stimgen::{Config, Error, Result, Session, VERSION};

/// Neurostimulation trigger-sequence engine
#[derive(Parser)]
#[command(name = "stimgen")]
#[command(author = "Stimgen Contributors")]
#[command(version = VERSION)]
#[command(about = "Validate, compile and play stimulation patterns")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a pattern against the safety limits
    Check {
        /// Pattern file (.json, .yaml or .yml)
        pattern: PathBuf,
    },

    /// Compile a pattern and print the event list
    Compile {
        /// Pattern file (.json, .yaml or .yml)
        pattern: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },

    /// Print the total duration of a pattern
    Duration {
        /// Pattern file (.json, .yaml or .yml)
        pattern: PathBuf,
    },

    /// Play a pattern on the simulated device
    Simulate {
        /// Pattern file (.json, .yaml or .yml)
        pattern: PathBuf,

        /// Sample rate override
        #[arg(long, env = "STIMGEN_SAMPLE_RATE_HZ")]
        sample_rate_hz: Option<u32>,
    },

    /// Convert a trigger-protocol file into a pattern
    Protocol {
        /// Protocol parameter file (.json, .yaml or .yml)
        file: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,

        /// Print the train phase this many seconds after start instead
        #[arg(long)]
        at: Option<f64>,
    },

    /// Show effective configuration
    Config,

    /// Validate configuration file
    Validate,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Yaml,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    match cli.command {
        Commands::Check { pattern } => {
            let session = Session::new(config)?;
            let node: PatternNode = read_document(&pattern)?;
            match session.validate(node)? {
                Verdict::Accepted(_) => {
                    println!("Pattern accepted");
                }
                Verdict::Rejected(violations) => {
                    println!("Pattern rejected: {} violation(s)", violations.len());
                    for v in &violations {
                        println!("  {}", v);
                    }
                    std::process::exit(1);
                }
            }
        }

        Commands::Compile { pattern, format } => {
            let session = Session::new(config)?;
            let node: PatternNode = read_document(&pattern)?;
            let sequence = session.compile(node)?;
            println!("{}", render(sequence.as_ref(), format)?);
        }

        Commands::Duration { pattern } => {
            let node: PatternNode = read_document(&pattern)?;
            node.check_structure()?;
            let ns = flatten_duration(&node);
            println!("{} ns ({:.6} s)", ns, ns as f64 / NS_PER_S as f64);
        }

        Commands::Simulate {
            pattern,
            sample_rate_hz,
        } => {
            if let Some(rate) = sample_rate_hz {
                config.scheduler.sample_rate_hz = rate;
            }
            let session = Session::new(config)?;
            let node: PatternNode = read_document(&pattern)?;
            let sequence = session.compile(node)?;

            let adapter = SimulatedAdapter::with_device(session.config().device.clone());
            let probe = adapter.probe();
            info!(
                session_id = %session.id(),
                events = sequence.len(),
                channels = ?sequence.channel_ids(),
                "Starting simulated playback"
            );
            match session.play(sequence, adapter).and_then(|p| p.wait()) {
                Ok(report) => {
                    info!(outputs = ?probe.outputs(), "Simulated playback finished");
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
                Err(e) => {
                    error!(error = %e, frames = probe.frame_count(), "Simulated playback failed");
                    eprintln!("Playback failed: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Protocol { file, format, at } => {
            let protocol: TriggerProtocol = read_document(&file)?;
            if let Some(seconds) = at {
                let elapsed = seconds_to_ns(seconds).ok_or_else(|| {
                    Error::Config(format!("--at must be a non-negative time, got {}", seconds))
                })?;
                println!("{:?}", protocol.phase_at(elapsed)?);
                return Ok(());
            }
            let node = protocol.to_pattern()?;
            info!(
                count = protocol.count,
                total_duration_ns = protocol.total_duration_ns()?,
                "Protocol converted"
            );
            println!("{}", render(&node, format)?);
        }

        Commands::Config => {
            // Show effective configuration
            println!("{}", serde_yaml::to_string(&config)?);
        }

        Commands::Validate => {
            // Validate configuration
            match config.validate() {
                Ok(()) => {
                    println!("Configuration is valid");
                }
                Err(e) => {
                    eprintln!("Configuration error: {}", e);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}

/// Initialize logging with tracing.
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

/// Parse a JSON or YAML file, chosen by extension.
fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_yaml::from_str(&content)?)
    }
}

fn render<T: Serialize + ?Sized>(value: &T, format: Format) -> Result<String> {
    match format {
        Format::Json => serde_json::to_string_pretty(value).map_err(Error::from),
        Format::Yaml => serde_yaml::to_string(value).map_err(Error::from),
    }
}
