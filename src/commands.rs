//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use sage_rag::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Ask { query, env } => println!("{env}: {query}"),
//!     Commands::Seed { env } => println!("seeding for {env}"),
//!     Commands::Init => println!("writing default config"),
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::LOCAL_ENVIRONMENT;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to the YAML config file. Defaults to `config.yaml` in the platform config directory.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Ask a question; the index is prepared first if needed.
    #[clap(name = "ask", alias = "a")]
    Ask {
        /// The question to answer.
        query: String,

        /// Deployment environment. `local` never touches the remote archive.
        #[arg(long, short = 'e', env = "env", default_value = LOCAL_ENVIRONMENT)]
        env: String,
    },

    /// Build, download or publish the index, then exit.
    #[clap(name = "seed", alias = "s")]
    Seed {
        /// Deployment environment. `local` never touches the remote archive.
        #[arg(long, short = 'e', env = "env", default_value = LOCAL_ENVIRONMENT)]
        env: String,
    },

    /// Write a default config file into the config directory.
    Init,
}
