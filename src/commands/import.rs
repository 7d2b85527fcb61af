use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use feedsync_core::upload::{Upload, import_upload};
use feedsync_core::{FeedFetcher, FeedSyncConfig, GroupId, OccurrenceId, RunSettings};
use owo_colors::OwoColorize;

use super::source::MetadataArgs;
use crate::lock;
use crate::render::Render;

pub async fn run(
    config: &FeedSyncConfig,
    location: &str,
    group: String,
    only: Vec<String>,
    metadata: MetadataArgs,
) -> Result<()> {
    let _lock = lock::acquire(&config.data_path())?;
    let store = super::open_store(config).await?;
    let publisher = super::publisher(config)?;

    let content = super::fetcher(config)?.fetch(location).await?;
    let selected: Option<HashSet<OccurrenceId>> =
        (!only.is_empty()).then(|| only.into_iter().map(OccurrenceId).collect());

    let report = import_upload(
        store.as_ref(),
        publisher.as_ref(),
        Upload {
            content: &content,
            group: &GroupId(group),
            defaults: &metadata.into_metadata()?,
            selected: selected.as_ref(),
        },
        &RunSettings::from(config),
        Utc::now(),
    )
    .await?;

    if report.created.is_empty() && !report.has_failures() {
        println!("{}", "No events selected or already created".dimmed());
    } else {
        println!("{}", report.render());
    }

    Ok(())
}
