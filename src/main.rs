//! Main module for the Sage CLI application (`sage`).
//!
//! Parses the command line, loads configuration and dispatches to the library.
//!
//! # Examples
//!
//! ```sh
//! sage init
//! sage seed --env prod
//! sage ask "How can I be more patient?"
//! env=staging sage ask "How can I be more patient?"
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use sage_rag::commands::{Cli, Commands};
use sage_rag::config::load_config;
use std::error::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Loads configuration and executes the parsed command.
///
/// # Errors
///
/// Returns an error if the configuration cannot be loaded or the command fails.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => sage_rag::config_dir()?.join(sage_rag::CONFIG_FILE),
    };

    if let Commands::Init = cli.command {
        debug!("Initializing configuration");
        sage_rag::write_default_config(&config_path)?;
        println!("{}", config_path.display());
        return Ok(());
    }

    debug!("Loading config from: {}", config_path.display());
    let config = load_config(&config_path.to_string_lossy())?;

    match cli.command {
        Commands::Seed { env } => {
            let source = sage_rag::seed(&config, &env).await?;
            println!("Index ready in {} ({:?})", config.index_dir.display(), source);
        }
        Commands::Ask { query, env } => {
            let response = sage_rag::ask(&config, &env, &query).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Init => {}
    }

    Ok(())
}
