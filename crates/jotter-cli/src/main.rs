//! Jotter CLI - Headless front-end for the Jotter notebook kernel.

mod cache;
mod colors;
mod resolve;
mod run;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use jotter_core::config::DEFAULT_STRATEGY;
use jotter_core::{KernelDirs, SessionConfig};

#[derive(Parser)]
#[command(name = "jotter")]
#[command(about = "Headless front-end for the Jotter notebook kernel")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Session configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use only bundled and local libraries
    #[arg(long, global = true)]
    offline: bool,

    /// Directory holding `.jotter` instead of the user's home
    #[arg(long, global = true, hide = true)]
    home: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a snippet script; snippets are separated by `# %%` lines
    Run {
        /// Path to the script
        script: PathBuf,

        /// Do not track bindings between snippets
        #[arg(long)]
        no_bindings: bool,
    },

    /// Resolve a library reference and print its definition as JSON
    Resolve {
        /// Reference such as `name`, `name@ref[main]` or `name(arg=value)`
        reference: String,
    },

    /// Manage the library descriptor cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove all cached descriptors
    Clean,
    /// Print the cache directory
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Helper to format jotter-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(jotter_err) = err.downcast_ref::<jotter_core::Error>() {
            anyhow::anyhow!("{}", jotter_err.with_hint())
        } else {
            err
        }
    };

    let config = load_config(cli.config.as_deref(), cli.offline).map_err(format_error)?;
    let dirs = match &cli.home {
        Some(home) => KernelDirs::from_home(home),
        None => KernelDirs::from_user_home(),
    }
    .map_err(anyhow::Error::from)
    .map_err(format_error)?;

    match cli.command {
        Commands::Run {
            script,
            no_bindings,
        } => {
            let mut config = config;
            if no_bindings {
                config.track_bindings = false;
            }
            run::execute(&script, config, &dirs)
                .await
                .map_err(format_error)?;
        }

        Commands::Resolve { reference } => {
            resolve::execute(&reference, &config, &dirs).map_err(format_error)?;
        }

        Commands::Cache { action } => match action {
            CacheAction::Clean => cache::clean(&config, &dirs).map_err(format_error)?,
            CacheAction::Path => cache::print_path(&config, &dirs),
        },
    }

    Ok(())
}

fn load_config(path: Option<&Path>, offline: bool) -> anyhow::Result<SessionConfig> {
    let mut config = match path {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    if offline {
        config.repository.enabled = false;
        // Without the repository, bare names can only come from the bundle
        if config.default_strategy == DEFAULT_STRATEGY {
            config.default_strategy = SessionConfig::offline().default_strategy;
        }
    }
    Ok(config)
}
