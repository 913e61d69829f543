// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! shmlock CLI
//!
//! Command-line interface for creating, inspecting and removing named
//! shared memory segments.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use shmlock_core::{OptionsLoader, SegmentOptions};

mod commands;

/// shmlock - Named shared memory segments with a built-in mutex
#[derive(Parser)]
#[command(name = "shmlock")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Segment options file (YAML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Attach to an existing segment and print its header and payload
    Inspect {
        /// Segment name
        name: String,

        /// Number of payload bytes to dump
        #[arg(short, long, default_value_t = 64)]
        bytes: usize,
    },

    /// Create a segment, or attach if it already exists
    Create {
        /// Segment name
        name: String,

        /// Payload size in bytes
        #[arg(short, long)]
        size: usize,

        /// Stay attached for this many milliseconds before exiting
        #[arg(long)]
        hold_ms: Option<u64>,

        /// Hold the segment lock while staying attached
        #[arg(long)]
        locked: bool,
    },

    /// Increment a u64 counter segment under its lock
    Bump {
        /// Segment name
        name: String,

        /// Number of increments, each in its own critical section
        #[arg(short, long, default_value_t = 1)]
        times: u64,
    },

    /// Unlink a segment and its mutex
    Remove {
        /// Segment name
        name: String,
    },

    /// Validate an options file
    Validate {
        /// Path to the options file
        file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging; stdout is kept for command output
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_writer(std::io::stderr)
        .init();

    let options = match &cli.config {
        Some(path) => OptionsLoader::load_file(path)?,
        None => SegmentOptions::default(),
    };

    // Dispatch to command handlers
    match cli.command {
        Commands::Inspect { name, bytes } => commands::inspect::execute(&name, bytes, options),
        Commands::Create {
            name,
            size,
            hold_ms,
            locked,
        } => commands::create::execute(&name, size, hold_ms, locked, options),
        Commands::Bump { name, times } => commands::bump::execute(&name, times, options),
        Commands::Remove { name } => commands::remove::execute(&name),
        Commands::Validate { file } => commands::validate::execute(&file),
    }
}
