//! Batch runs over all active sources, and the daemon loop driving them.

use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt, stream};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::config::FeedSyncConfig;
use crate::error::{FeedSyncError, FeedSyncResult};
use crate::feed::FeedFetcher;
use crate::ics::{ParseOptions, parse_feed};
use crate::metadata::PublishDefaults;
use crate::occurrence::{ExpansionOptions, KnownOccurrences, expand_feed};
use crate::publisher::Publisher;
use crate::source::{FeedSource, GroupId, SourceId};
use crate::store::Store;
use crate::sync::{
    ApplyContext, RunReport, SourceDiff, SourceOutcome, SourceRunReport, SourceStage,
};

/// Settings for one batch run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub parse: ParseOptions,
    pub expansion: ExpansionOptions,
    pub publish_defaults: PublishDefaults,
    pub chunk_size: usize,
    pub concurrency: usize,
    pub retire_remote_events: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings::from(&FeedSyncConfig::default())
    }
}

impl From<&FeedSyncConfig> for RunSettings {
    fn from(config: &FeedSyncConfig) -> Self {
        RunSettings {
            parse: config.parse_options(),
            expansion: config.expansion_options(),
            publish_defaults: config.publish_defaults(),
            chunk_size: config.source_chunk_size.max(1),
            concurrency: config.source_concurrency.max(1),
            retire_remote_events: config.retire_remote_events,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunReport),
    /// Another run was still in progress.
    Skipped,
}

/// Exclusion shared with other processes, held for the length of one run.
pub trait RunLock: Send + Sync {
    /// `Ok(None)` when someone else holds the lock. Dropping the guard releases it.
    fn try_acquire(&self) -> FeedSyncResult<Option<Box<dyn Send>>>;
}

/// Drives fetch, parse, expand and reconcile for every source.
///
/// At most one run is in flight per runner; a run requested while another is
/// going on is skipped rather than queued. With a [`RunLock`] the same holds
/// across processes, and the store is reloaded at the start of every run.
pub struct BatchRunner {
    store: Arc<dyn Store>,
    publisher: Arc<dyn Publisher>,
    fetcher: Arc<dyn FeedFetcher>,
    settings: RunSettings,
    in_flight: tokio::sync::Mutex<()>,
    run_lock: Option<Arc<dyn RunLock>>,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn Store>,
        publisher: Arc<dyn Publisher>,
        fetcher: Arc<dyn FeedFetcher>,
        settings: RunSettings,
    ) -> Self {
        BatchRunner {
            store,
            publisher,
            fetcher,
            settings,
            in_flight: tokio::sync::Mutex::new(()),
            run_lock: None,
        }
    }

    pub fn with_run_lock(mut self, run_lock: Arc<dyn RunLock>) -> Self {
        self.run_lock = Some(run_lock);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Reconcile every active source.
    ///
    /// Sources are loaded in chunks. Only failures that affect the whole run
    /// (listing groups, reading the store) are returned as errors.
    pub async fn run_all(&self) -> FeedSyncResult<RunOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::info!("previous run still in progress, skipping");
            return Ok(RunOutcome::Skipped);
        };
        let Some(_held) = self.begin_run().await? else {
            tracing::info!("data directory busy, skipping");
            return Ok(RunOutcome::Skipped);
        };

        let now = Utc::now();
        let (groups, known) = self.prepare().await?;
        let mut reports = Vec::new();
        let mut offset = 0;

        loop {
            let sources = self
                .store
                .active_sources(offset, self.settings.chunk_size)
                .await?;
            let loaded = sources.len();
            offset += loaded;

            let chunk: Vec<SourceRunReport> = stream::iter(sources)
                .map(|source| self.process_isolated(source, &groups, &known, now))
                .buffer_unordered(self.settings.concurrency)
                .collect()
                .await;
            reports.extend(chunk);

            if loaded < self.settings.chunk_size {
                break;
            }
        }

        let report = RunReport(reports);
        let (reconciled, skipped, failed) = report.source_counts();
        let (created, deleted, failed_occurrences) = report.occurrence_counts();
        tracing::info!(
            reconciled,
            skipped,
            failed,
            created,
            deleted,
            failed_occurrences,
            "run finished"
        );

        Ok(RunOutcome::Completed(report))
    }

    /// Reconcile one source right away, whether or not it is active.
    pub async fn run_source(&self, id: &SourceId) -> FeedSyncResult<RunOutcome> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            tracing::info!(source_id = %id, "previous run still in progress, skipping");
            return Ok(RunOutcome::Skipped);
        };
        let Some(_held) = self.begin_run().await? else {
            tracing::info!(source_id = %id, "data directory busy, skipping");
            return Ok(RunOutcome::Skipped);
        };

        let source = self
            .store
            .find_source(id)
            .await?
            .ok_or_else(|| FeedSyncError::SourceNotFound(id.clone()))?;

        let (groups, known) = self.prepare().await?;
        let report = self.process_isolated(source, &groups, &known, Utc::now()).await;

        Ok(RunOutcome::Completed(RunReport(vec![report])))
    }

    /// Take the run lock, then refresh the store. `None` while the lock is held elsewhere.
    async fn begin_run(&self) -> FeedSyncResult<Option<Box<dyn Send>>> {
        let held: Box<dyn Send> = match &self.run_lock {
            Some(lock) => match lock.try_acquire()? {
                Some(guard) => guard,
                None => return Ok(None),
            },
            None => Box::new(()),
        };
        self.store.reload().await?;
        Ok(Some(held))
    }

    /// Group list and materialized-id snapshot, read once per run.
    async fn prepare(&self) -> FeedSyncResult<(HashSet<GroupId>, KnownOccurrences)> {
        let groups: HashSet<_> = self.publisher.list_groups().await?.into_iter().collect();
        let known = KnownOccurrences::new(self.store.materialized_ids().await?);
        tracing::debug!(groups = groups.len(), known = known.len(), "prepared run");
        Ok((groups, known))
    }

    /// Process one source; errors and panics end up in its report only.
    async fn process_isolated(
        &self,
        source: FeedSource,
        groups: &HashSet<GroupId>,
        known: &KnownOccurrences,
        now: DateTime<Utc>,
    ) -> SourceRunReport {
        let stage = Mutex::new(SourceStage::Fetch);
        let span = tracing::info_span!("source", source_id = %source.id, url = %source.url);

        let outcome = AssertUnwindSafe(self.process(&source, groups, known, now, &stage))
            .catch_unwind()
            .instrument(span.clone())
            .await
            .unwrap_or_else(|panic| {
                let stage = *stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                let error = FeedSyncError::Unexpected(panic_message(panic.as_ref()));
                span.in_scope(|| tracing::error!(%stage, error = %error, "source processing panicked"));
                SourceOutcome::Failed {
                    stage,
                    error: error.to_string(),
                }
            });

        SourceRunReport {
            source_id: source.id,
            url: source.url,
            outcome,
        }
    }

    async fn process(
        &self,
        source: &FeedSource,
        groups: &HashSet<GroupId>,
        known: &KnownOccurrences,
        now: DateTime<Utc>,
        stage: &Mutex<SourceStage>,
    ) -> SourceOutcome {
        let enter = |next: SourceStage| {
            *stage.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
        };
        let failed = |stage: SourceStage, error: FeedSyncError| {
            tracing::warn!(%stage, error = %error, "skipping source");
            SourceOutcome::Failed {
                stage,
                error: error.to_string(),
            }
        };

        if !groups.contains(&source.group_id) {
            tracing::warn!(group_id = %source.group_id, "target group not found, skipping source");
            return SourceOutcome::GroupMissing {
                group: source.group_id.clone(),
            };
        }

        enter(SourceStage::Fetch);
        let content = match self.fetcher.fetch(&source.url).await {
            Ok(content) => content,
            Err(e) => return failed(SourceStage::Fetch, e),
        };

        enter(SourceStage::Parse);
        let events = match parse_feed(&content, &self.settings.parse, now) {
            Ok(events) => events,
            Err(e) => return failed(SourceStage::Parse, e),
        };

        enter(SourceStage::Expand);
        let expansion = match expand_feed(&events, &self.settings.expansion, known) {
            Ok(expansion) => expansion,
            Err(e) => return failed(SourceStage::Expand, e),
        };

        enter(SourceStage::Reconcile);
        let existing = match self.store.materialized_events_for(&source.id).await {
            Ok(existing) => existing,
            Err(e) => return failed(SourceStage::Reconcile, e),
        };

        let diff = SourceDiff::compute(Some(&source.id), expansion.occurrences, existing, known);
        let report = diff
            .apply(&ApplyContext {
                store: self.store.as_ref(),
                publisher: self.publisher.as_ref(),
                known,
                group: &source.group_id,
                source_defaults: &source.defaults,
                publish_defaults: &self.settings.publish_defaults,
                retire_remote_events: self.settings.retire_remote_events,
            })
            .await;

        tracing::info!(
            events = events.len(),
            created = report.created.len(),
            deleted = report.deleted.len(),
            unchanged = report.unchanged,
            failed = report.failed_creates.len() + report.failed_deletes.len(),
            "source reconciled"
        );

        SourceOutcome::Reconciled(report)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Start a run every `interval` until `shutdown` resolves.
///
/// Runs are spawned, so a slow run never delays the clock; a tick that finds
/// the previous run still going is skipped by the runner. Every spawned run
/// is awaited before this returns.
pub async fn run_daemon(runner: Arc<BatchRunner>, interval: Duration, shutdown: impl Future<Output = ()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    tracing::info!(interval = %humantime::format_duration(interval), "daemon started");

    let mut runs: Vec<JoinHandle<()>> = Vec::new();
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                runs.retain(|run| !run.is_finished());
                let runner = runner.clone();
                runs.push(tokio::spawn(async move {
                    match runner.run_all().await {
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "run failed"),
                    }
                }));
            }
            _ = &mut shutdown => {
                tracing::info!("daemon stopping");
                break;
            }
        }
    }

    for run in runs {
        if let Err(e) = run.await {
            tracing::error!(error = %e, "run task failed");
        }
    }
}
