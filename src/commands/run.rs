use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use feedsync_core::publisher::InMemoryPublisher;
use feedsync_core::store::InMemoryStore;
use feedsync_core::{BatchRunner, FeedSyncConfig, RunOutcome, RunSettings, SourceId};
use owo_colors::OwoColorize;

use crate::lock;
use crate::render::Render;

pub async fn run(config: &FeedSyncConfig, source: Option<String>, dry_run: bool) -> Result<()> {
    let _lock = lock::acquire(&config.data_path())?;
    let store = super::open_store(config).await?;
    let settings = RunSettings::from(config);

    let runner = if dry_run {
        // Work on a copy of the state; every group a source names is assumed to exist
        let (sources, events) = store.snapshot().await;
        let groups: HashSet<_> = sources.iter().map(|s| s.group_id.clone()).collect();
        BatchRunner::new(
            Arc::new(InMemoryStore::seeded(sources, events)),
            Arc::new(InMemoryPublisher::with_groups(groups)),
            super::fetcher(config)?,
            settings,
        )
    } else {
        BatchRunner::new(store, super::publisher(config)?, super::fetcher(config)?, settings)
    };

    let outcome = match source {
        Some(id) => runner.run_source(&SourceId::from(id.as_str())).await?,
        None => runner.run_all().await?,
    };

    match outcome {
        RunOutcome::Completed(report) => println!("{}", report.render()),
        RunOutcome::Skipped => println!("{}", "A run is already in progress".yellow()),
    }

    if dry_run {
        println!("{}", "\nDry run: nothing was published or recorded".dimmed());
    }

    Ok(())
}
