mod common;

use std::sync::Arc;

use feedsync_core::publisher::InMemoryPublisher;
use feedsync_core::store::InMemoryStore;
use feedsync_core::{
    EventMetadata, FeedSource, GroupId, OccurrenceId, RunSettings, StaticFeeds, Store,
};

use common::{calendar, completed, reconciled, runner, runner_with, settings, simple_feed, vevent};

const FEED_URL: &str = "https://example.org/feed.ics";

fn ids(ids: &[OccurrenceId]) -> Vec<&str> {
    ids.iter().map(|id| id.as_str()).collect()
}

async fn stored_ids(store: &InMemoryStore) -> Vec<String> {
    let mut ids: Vec<_> = store
        .materialized_ids()
        .await
        .unwrap()
        .into_iter()
        .map(|id| id.0)
        .collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn single_event_is_created_once() {
    let group = GroupId::from("g");
    let source = FeedSource::new(FEED_URL, group.clone(), EventMetadata::default());
    let store = Arc::new(InMemoryStore::with_sources(vec![source.clone()]));
    let publisher = Arc::new(InMemoryPublisher::with_groups([group]));
    let feed = calendar(&[vevent("e1", "Launch", "20250110T100000Z", "20250110T120000Z", None)]);

    let report = completed(
        runner(&store, &publisher, StaticFeeds::new().with(FEED_URL, &feed))
            .run_all()
            .await
            .unwrap(),
    );

    let result = reconciled(&report, &source.id);
    assert_eq!(ids(&result.created), vec!["e1"]);
    assert!(result.deleted.is_empty());

    let record = store.find_materialized(&OccurrenceId::from("e1")).await.unwrap().unwrap();
    assert_eq!(record.source_id.as_ref(), Some(&source.id));
    assert_eq!(record.duration, "02:00");
    assert_eq!(record.start_time.as_deref(), Some("10:00"));
    assert_eq!(publisher.created_titles(), vec!["Launch"]);
}

#[tokio::test]
async fn weekly_series_materializes_each_instance() {
    let group = GroupId::from("g");
    let source = FeedSource::new(FEED_URL, group.clone(), EventMetadata::default());
    let store = Arc::new(InMemoryStore::with_sources(vec![source.clone()]));
    let publisher = Arc::new(InMemoryPublisher::with_groups([group]));
    let feed = calendar(&[vevent(
        "e1",
        "Choir",
        "20250106T090000Z",
        "20250106T100000Z",
        Some("FREQ=WEEKLY;COUNT=3"),
    )]);

    let report = completed(
        runner(&store, &publisher, StaticFeeds::new().with(FEED_URL, &feed))
            .run_all()
            .await
            .unwrap(),
    );

    assert_eq!(
        ids(&reconciled(&report, &source.id).created),
        vec!["e1__20250106T090000", "e1__20250113T090000", "e1__20250120T090000"]
    );
    for (_, event) in publisher.created() {
        assert_eq!(event.title, "Choir");
        assert_eq!((event.ends_on - event.begins_on).num_minutes(), 60);
    }
}

#[tokio::test]
async fn removed_upstream_occurrence_is_deleted() {
    let group = GroupId::from("g");
    let source = FeedSource::new(FEED_URL, group.clone(), EventMetadata::default());
    let store = Arc::new(InMemoryStore::with_sources(vec![source.clone()]));
    let publisher = Arc::new(InMemoryPublisher::with_groups([group]));

    let first = StaticFeeds::new().with(FEED_URL, &simple_feed(&["o1", "o2", "o3"]));
    completed(runner(&store, &publisher, first).run_all().await.unwrap());
    assert_eq!(stored_ids(&store).await, vec!["o1", "o2", "o3"]);

    let second = StaticFeeds::new().with(FEED_URL, &simple_feed(&["o1", "o3"]));
    let report = completed(runner(&store, &publisher, second).run_all().await.unwrap());

    let result = reconciled(&report, &source.id);
    assert!(result.created.is_empty());
    assert_eq!(ids(&result.deleted), vec!["o2"]);
    assert_eq!(result.unchanged, 2);
    assert_eq!(stored_ids(&store).await, vec!["o1", "o3"]);
    // Remote events stay unless retiring is switched on
    assert!(publisher.deleted().is_empty());
}

#[tokio::test]
async fn removed_occurrence_is_retired_remotely_when_enabled() {
    let group = GroupId::from("g");
    let source = FeedSource::new(FEED_URL, group.clone(), EventMetadata::default());
    let store = Arc::new(InMemoryStore::with_sources(vec![source.clone()]));
    let publisher = Arc::new(InMemoryPublisher::with_groups([group]));
    let settings = RunSettings {
        retire_remote_events: true,
        ..settings()
    };

    let first = StaticFeeds::new().with(FEED_URL, &simple_feed(&["o1", "o2"]));
    completed(runner_with(&store, &publisher, first, settings.clone()).run_all().await.unwrap());
    let o2 = store.find_materialized(&OccurrenceId::from("o2")).await.unwrap().unwrap();

    let second = StaticFeeds::new().with(FEED_URL, &simple_feed(&["o1"]));
    completed(runner_with(&store, &publisher, second, settings).run_all().await.unwrap());

    assert_eq!(publisher.deleted(), vec![o2.remote]);
}

#[tokio::test]
async fn failed_create_is_retried_on_next_run() {
    let group = GroupId::from("g");
    let source = FeedSource::new(FEED_URL, group.clone(), EventMetadata::default());
    let store = Arc::new(InMemoryStore::with_sources(vec![source.clone()]));
    let feed = simple_feed(&["o1", "o2", "o3", "o4", "o5"]);

    let flaky = Arc::new(InMemoryPublisher::with_groups([group.clone()]).fail_creates_titled("o4"));
    let report = completed(
        runner(&store, &flaky, StaticFeeds::new().with(FEED_URL, &feed))
            .run_all()
            .await
            .unwrap(),
    );

    let result = reconciled(&report, &source.id);
    assert_eq!(ids(&result.created), vec!["o1", "o2", "o3", "o5"]);
    assert_eq!(ids(&result.failed_creates), vec!["o4"]);
    assert_eq!(stored_ids(&store).await, vec!["o1", "o2", "o3", "o5"]);

    let healthy = Arc::new(InMemoryPublisher::with_groups([group]));
    let report = completed(
        runner(&store, &healthy, StaticFeeds::new().with(FEED_URL, &feed))
            .run_all()
            .await
            .unwrap(),
    );

    assert_eq!(ids(&reconciled(&report, &source.id).created), vec!["o4"]);
    assert_eq!(stored_ids(&store).await, vec!["o1", "o2", "o3", "o4", "o5"]);
}

#[tokio::test]
async fn second_run_over_unchanged_feed_is_a_noop() {
    let group = GroupId::from("g");
    let source = FeedSource::new(FEED_URL, group.clone(), EventMetadata::default());
    let store = Arc::new(InMemoryStore::with_sources(vec![source.clone()]));
    let publisher = Arc::new(InMemoryPublisher::with_groups([group]));
    let feed = calendar(&[
        vevent("weekly", "Weekly", "20250106T090000Z", "20250106T100000Z", Some("FREQ=WEEKLY;COUNT=4")),
        vevent("once", "Once", "20250110T100000Z", "20250110T110000Z", None),
    ]);
    let runner = runner(&store, &publisher, StaticFeeds::new().with(FEED_URL, &feed));

    let first = completed(runner.run_all().await.unwrap());
    assert_eq!(reconciled(&first, &source.id).created.len(), 5);

    let second = completed(runner.run_all().await.unwrap());
    let result = reconciled(&second, &source.id);
    assert!(result.is_noop());
    assert_eq!(result.unchanged, 5);
    assert_eq!(publisher.created().len(), 5);
}

#[tokio::test]
async fn reconciling_one_source_never_deletes_anothers_records() {
    let group = GroupId::from("g");
    let a = FeedSource::new("https://a.example/feed.ics", group.clone(), EventMetadata::default());
    let b = FeedSource::new("https://b.example/feed.ics", group.clone(), EventMetadata::default());
    let store = Arc::new(InMemoryStore::with_sources(vec![a.clone(), b.clone()]));
    let publisher = Arc::new(InMemoryPublisher::with_groups([group]));

    let feeds = StaticFeeds::new()
        .with(&a.url, &simple_feed(&["a1", "a2"]))
        .with(&b.url, &simple_feed(&["b1"]));
    completed(runner(&store, &publisher, feeds).run_all().await.unwrap());
    assert_eq!(stored_ids(&store).await, vec!["a1", "a2", "b1"]);

    // B's feed empties out; only B's record may go
    let feeds = StaticFeeds::new()
        .with(&a.url, &simple_feed(&["a1", "a2"]))
        .with(&b.url, &calendar(&[]));
    let report = completed(runner(&store, &publisher, feeds).run_source(&b.id).await.unwrap());

    assert_eq!(ids(&reconciled(&report, &b.id).deleted), vec!["b1"]);
    assert_eq!(stored_ids(&store).await, vec!["a1", "a2"]);
    assert_eq!(store.materialized_events_for(&a.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn occurrence_shared_by_two_sources_is_created_once() {
    let group = GroupId::from("g");
    let a = FeedSource::new("https://a.example/feed.ics", group.clone(), EventMetadata::default());
    let b = FeedSource::new("https://b.example/feed.ics", group.clone(), EventMetadata::default());
    let store = Arc::new(InMemoryStore::with_sources(vec![a.clone(), b.clone()]));
    let publisher = Arc::new(InMemoryPublisher::with_groups([group]));
    let shared = calendar(&[vevent(
        "shared",
        "Shared",
        "20250106T090000Z",
        "20250106T100000Z",
        Some("FREQ=WEEKLY;COUNT=3"),
    )]);
    let feeds = StaticFeeds::new().with(&a.url, &shared).with(&b.url, &shared);
    let runner = runner(&store, &publisher, feeds);

    let report = completed(runner.run_all().await.unwrap());

    let (created, _, failed) = report.occurrence_counts();
    assert_eq!(created, 3);
    assert_eq!(failed, 0);
    assert_eq!(publisher.created().len(), 3);
    assert_eq!(store.materialized_ids().await.unwrap().len(), 3);

    // Whichever source lost the race keeps reporting the ids as owned elsewhere
    let second = completed(runner.run_all().await.unwrap());
    let elsewhere: usize = second.reconciled().map(|r| r.materialized_elsewhere).sum();
    let unchanged: usize = second.reconciled().map(|r| r.unchanged).sum();
    assert_eq!((elsewhere, unchanged), (3, 3));
    assert_eq!(second.occurrence_counts(), (0, 0, 0));
}

#[tokio::test]
async fn uploaded_occurrences_block_feed_duplicates() {
    use feedsync_core::upload::{Upload, import_upload};

    let group = GroupId::from("g");
    let source = FeedSource::new(FEED_URL, group.clone(), EventMetadata::default());
    let store = Arc::new(InMemoryStore::with_sources(vec![source.clone()]));
    let publisher = Arc::new(InMemoryPublisher::with_groups([group.clone()]));
    let feed = simple_feed(&["o1", "o2"]);

    let uploaded = import_upload(
        store.as_ref(),
        publisher.as_ref(),
        Upload {
            content: &simple_feed(&["o1"]),
            group: &group,
            defaults: &EventMetadata::default(),
            selected: None,
        },
        &settings(),
        chrono::Utc::now(),
    )
    .await
    .unwrap();
    assert_eq!(ids(&uploaded.created), vec!["o1"]);

    let report = completed(
        runner(&store, &publisher, StaticFeeds::new().with(FEED_URL, &feed))
            .run_all()
            .await
            .unwrap(),
    );

    let result = reconciled(&report, &source.id);
    assert_eq!(ids(&result.created), vec!["o2"]);
    assert_eq!(result.materialized_elsewhere, 1);
    assert_eq!(publisher.created_titles(), vec!["o1", "o2"]);
}
