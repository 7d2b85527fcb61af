use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use feedsync_core::metadata::{EventMetadata, EventStatus, JoinOptions, Visibility};
use feedsync_core::store::FileStore;
use feedsync_core::{
    BatchRunner, FeedSource, FeedSyncConfig, GroupId, RunOutcome, RunSettings, SourceId, Store,
};
use owo_colors::OwoColorize;
use serde::de::DeserializeOwned;

use crate::lock;
use crate::render::Render;

#[derive(Subcommand)]
pub enum SourceCommand {
    /// Subscribe to a feed
    Add {
        url: String,

        /// Group the feed's events are attributed to
        #[arg(short, long)]
        group: String,

        /// Who registered the feed
        #[arg(long)]
        owner: Option<String>,

        /// Don't import the feed right away
        #[arg(long)]
        no_run: bool,

        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// List all sources
    List,
    /// Include a source in scheduled runs again
    Activate { id: String },
    /// Leave a source out of scheduled runs
    Deactivate { id: String },
}

/// Publishing defaults for events that don't set these fields themselves.
#[derive(Args, Debug, Default)]
pub struct MetadataArgs {
    #[arg(long)]
    description: Option<String>,

    #[arg(long)]
    category: Option<String>,

    /// CONFIRMED, TENTATIVE or CANCELLED
    #[arg(long)]
    status: Option<String>,

    /// FREE, RESTRICTED, INVITE or EXTERNAL
    #[arg(long)]
    join_options: Option<String>,

    /// Registration link, sent when join options are EXTERNAL
    #[arg(long)]
    external_participation_url: Option<String>,

    #[arg(long)]
    language: Option<String>,

    /// PUBLIC, UNLISTED, RESTRICTED or PRIVATE
    #[arg(long)]
    visibility: Option<String>,

    /// Repeat for several tags
    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long)]
    online_address: Option<String>,

    /// Address as a JSON object, passed through to the publisher
    #[arg(long)]
    physical_address: Option<String>,
}

fn parse_enum<T: DeserializeOwned>(field: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_uppercase()))
        .with_context(|| format!("Invalid {field} '{value}'"))
}

impl MetadataArgs {
    pub fn into_metadata(self) -> Result<EventMetadata> {
        let status = self
            .status
            .map(|s| parse_enum::<EventStatus>("status", &s))
            .transpose()?;
        let join_options = self
            .join_options
            .map(|s| parse_enum::<JoinOptions>("join options", &s))
            .transpose()?;
        let visibility = self
            .visibility
            .map(|s| parse_enum::<Visibility>("visibility", &s))
            .transpose()?;
        let physical_address = self
            .physical_address
            .map(|s| serde_json::from_str(&s).context("Invalid physical address JSON"))
            .transpose()?;

        Ok(EventMetadata {
            description: self.description,
            category: self.category,
            status,
            join_options,
            external_participation_url: self.external_participation_url,
            language: self.language,
            visibility,
            tags: (!self.tags.is_empty()).then_some(self.tags),
            online_address: self.online_address,
            physical_address,
        })
    }
}

async fn initial_run(config: &FeedSyncConfig, store: Arc<FileStore>, id: &SourceId) -> Result<RunOutcome> {
    let runner = BatchRunner::new(
        store,
        super::publisher(config)?,
        super::fetcher(config)?,
        RunSettings::from(config),
    );
    Ok(runner.run_source(id).await?)
}

pub async fn run(config: &FeedSyncConfig, command: SourceCommand) -> Result<()> {
    match command {
        SourceCommand::List => {
            let store = super::open_store(config).await?;
            let sources = store.all_sources().await?;
            if sources.is_empty() {
                println!(
                    "No sources yet.\n\n\
                    Subscribe to a feed with:\n  \
                    feedsync source add <url> --group <group-id>"
                );
            }
            for source in sources {
                println!("{}", source.render());
            }
        }
        SourceCommand::Add {
            url,
            group,
            owner,
            no_run,
            metadata,
        } => {
            let _lock = lock::acquire(&config.data_path())?;
            let store = super::open_store(config).await?;
            let mut source = FeedSource::new(&url, GroupId(group), metadata.into_metadata()?);
            source.owner = owner;
            store.save_source(&source).await?;
            println!("{} {}", "Added".green(), source.id);

            if no_run {
                return Ok(());
            }
            match initial_run(config, store, &source.id).await {
                Ok(RunOutcome::Completed(report)) => println!("{}", report.render()),
                Ok(RunOutcome::Skipped) => {}
                Err(e) => println!(
                    "{}",
                    format!("Initial run failed, the source will be picked up by the next scheduled run: {e}").yellow()
                ),
            }
        }
        SourceCommand::Activate { id } => {
            let _lock = lock::acquire(&config.data_path())?;
            let store = super::open_store(config).await?;
            store.set_source_active(&SourceId(id.clone()), true).await?;
            println!("{} {}", "Activated".green(), id);
        }
        SourceCommand::Deactivate { id } => {
            let _lock = lock::acquire(&config.data_path())?;
            let store = super::open_store(config).await?;
            store.set_source_active(&SourceId(id.clone()), false).await?;
            println!("{} {}", "Deactivated".yellow(), id);
        }
    }

    Ok(())
}
