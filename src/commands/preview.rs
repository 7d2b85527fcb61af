use anyhow::Result;
use feedsync_core::occurrence::KnownOccurrences;
use feedsync_core::upload::{PreviewResponse, preview_location};
use feedsync_core::{FeedSyncConfig, RunSettings, Store};
use owo_colors::OwoColorize;

use crate::render::Render;

pub async fn run(config: &FeedSyncConfig, location: &str, all: bool, list: bool) -> Result<()> {
    let store = super::open_store(config).await?;
    let known = KnownOccurrences::new(store.materialized_ids().await?);
    let fetcher = super::fetcher(config)?;

    let response = preview_location(
        fetcher.as_ref(),
        location,
        &RunSettings::from(config),
        &known,
        all,
    )
    .await;

    if !list {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return if response.is_error() {
            Err(anyhow::anyhow!("Preview failed"))
        } else {
            Ok(())
        };
    }

    match response {
        PreviewResponse::Events { events } if events.is_empty() => {
            println!("{}", "No new events".dimmed());
        }
        PreviewResponse::Events { events } => {
            for event in &events {
                println!("{}", event.render());
            }
            let new = events.iter().filter(|e| !e.already_exists).count();
            println!("\n{} new, {} already published", new, events.len() - new);
        }
        PreviewResponse::Error { error } => anyhow::bail!(error),
    }

    Ok(())
}
