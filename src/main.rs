mod commands;
mod lock;
mod render;
mod telemetry;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use feedsync_core::FeedSyncConfig;

use crate::commands::source::{MetadataArgs, SourceCommand};

#[derive(Parser)]
#[command(name = "feedsync")]
#[command(about = "Import iCal feeds into a federated calendar and keep them reconciled")]
struct Cli {
    /// Read configuration from this file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile all active sources on the configured interval until interrupted
    Daemon,
    /// Reconcile once and exit
    Run {
        /// Only reconcile this source (by id), even if it is inactive
        #[arg(short, long)]
        source: Option<String>,

        /// Show what would change without publishing or recording anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the occurrences a calendar file or URL would produce, as JSON
    Preview {
        location: String,

        /// Include occurrences that are already published
        #[arg(long)]
        all: bool,

        /// Print a readable listing instead of JSON
        #[arg(long)]
        list: bool,
    },
    /// Publish the occurrences of a calendar file once, without subscribing to it
    Import {
        location: String,

        /// Group the events are attributed to
        #[arg(short, long)]
        group: String,

        /// Only import these occurrence ids (as shown by preview)
        #[arg(long = "only")]
        only: Vec<String>,

        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// Manage subscribed feed sources
    Source {
        #[command(subcommand)]
        command: SourceCommand,
    },
    /// Show paths and the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Daemon => commands::daemon::run(&config).await,
        Commands::Run { source, dry_run } => commands::run::run(&config, source, dry_run).await,
        Commands::Preview {
            location,
            all,
            list,
        } => commands::preview::run(&config, &location, all, list).await,
        Commands::Import {
            location,
            group,
            only,
            metadata,
        } => commands::import::run(&config, &location, group, only, metadata).await,
        Commands::Source { command } => commands::source::run(&config, command).await,
        Commands::Config => commands::config::run(&config, cli.config.as_deref()),
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<FeedSyncConfig> {
    let config = match path {
        Some(path) => FeedSyncConfig::load_from(path)?,
        None => FeedSyncConfig::load()?,
    };
    Ok(config)
}
