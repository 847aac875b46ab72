//! Scenario tests for `TableSync` against an in-process change source.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use brigade::sync::{ChangeSource, FeedGuard, RowFetcher, SyncedRow, TableSync};
use brigade::{ChangeEvent, ChangeOp, Error, SyncState};

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct Ticket {
    id: i64,
    label: String,
}

impl SyncedRow for Ticket {
    const TABLE: &'static str = "tickets";

    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

fn ticket(id: i64, label: &str) -> Ticket {
    Ticket {
        id,
        label: label.to_string(),
    }
}

/// Change source delivering pushed events to every open feed.
#[derive(Default)]
struct MockSource {
    opens: AtomicUsize,
    feeds: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
    released: Mutex<Vec<Arc<AtomicBool>>>,
}

impl MockSource {
    fn push(&self, event: ChangeEvent) {
        for feed in self.feeds.lock().unwrap().iter() {
            let _ = feed.try_send(event.clone());
        }
    }

    fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    fn last_feed_released(&self) -> bool {
        self.released
            .lock()
            .unwrap()
            .last()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

struct MockFeed {
    released: Arc<AtomicBool>,
}

#[async_trait]
impl FeedGuard for MockFeed {
    async fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ChangeSource for MockSource {
    async fn open(
        &self,
        _table: &str,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<Box<dyn FeedGuard>, Error> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.feeds.lock().unwrap().push(events);
        let released = Arc::new(AtomicBool::new(false));
        self.released.lock().unwrap().push(Arc::clone(&released));
        Ok(Box::new(MockFeed { released }))
    }
}

fn counting_fetcher(
    data: Arc<Mutex<Vec<Ticket>>>,
    fetches: Arc<AtomicUsize>,
) -> RowFetcher<Ticket> {
    Arc::new(move || {
        let data = Arc::clone(&data);
        let fetches = Arc::clone(&fetches);
        Box::pin(async move {
            fetches.fetch_add(1, Ordering::SeqCst);
            Ok(data.lock().unwrap().clone())
        })
    })
}

fn insert_event(id: i64, label: &str) -> ChangeEvent {
    ChangeEvent {
        op: ChangeOp::Insert,
        table: "tickets".to_string(),
        row: serde_json::json!({ "id": id, "label": label }),
        old_row: None,
        commit_timestamp: None,
    }
}

fn update_event(id: i64, label: &str) -> ChangeEvent {
    ChangeEvent {
        op: ChangeOp::Update,
        table: "tickets".to_string(),
        row: serde_json::json!({ "id": id, "label": label }),
        old_row: None,
        commit_timestamp: None,
    }
}

fn delete_event(id: i64) -> ChangeEvent {
    ChangeEvent {
        op: ChangeOp::Delete,
        table: "tickets".to_string(),
        row: serde_json::Value::Null,
        old_row: Some(serde_json::json!({ "id": id })),
        commit_timestamp: None,
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[tokio::test]
async fn mount_fetches_and_goes_live() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(vec![ticket(1, "dine-in"), ticket(2, "takeaway")]));
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut sync = TableSync::new(
        counting_fetcher(data, Arc::clone(&fetches)),
        Duration::from_millis(20),
    );
    assert_eq!(sync.state(), SyncState::Unmounted);

    sync.mount(&source).await.unwrap();

    assert_eq!(sync.state(), SyncState::Live);
    assert_eq!(sync.snapshot().len(), 2);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(source.open_count(), 1);
}

#[tokio::test]
async fn remount_keeps_a_single_channel() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(vec![ticket(1, "dine-in")]));
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut sync = TableSync::new(
        counting_fetcher(data, Arc::clone(&fetches)),
        Duration::from_millis(20),
    );

    sync.mount(&source).await.unwrap();
    sync.mount(&source).await.unwrap();
    sync.mount(&source).await.unwrap();

    assert_eq!(source.open_count(), 1);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn changes_merge_by_row_id() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(vec![ticket(1, "dine-in")]));
    let mut sync = TableSync::new(
        counting_fetcher(data, Arc::new(AtomicUsize::new(0))),
        Duration::from_millis(20),
    );
    sync.mount(&source).await.unwrap();

    source.push(insert_event(2, "takeaway"));
    settle().await;
    assert_eq!(sync.snapshot().len(), 2);
    assert_eq!(sync.snapshot()[0].id, 2);

    source.push(update_event(2, "delivery"));
    settle().await;
    let rows = sync.snapshot();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].label, "delivery");

    source.push(delete_event(1));
    source.push(delete_event(1));
    settle().await;
    assert_eq!(sync.snapshot().len(), 1);
    assert_eq!(sync.snapshot()[0].id, 2);
}

#[tokio::test]
async fn redelivered_events_converge() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(Vec::new()));
    let mut sync = TableSync::new(
        counting_fetcher(data, Arc::new(AtomicUsize::new(0))),
        Duration::from_millis(20),
    );
    sync.mount(&source).await.unwrap();

    source.push(insert_event(5, "dine-in"));
    source.push(insert_event(5, "dine-in"));
    source.push(update_event(5, "takeaway"));
    source.push(update_event(5, "takeaway"));
    settle().await;

    let rows = sync.snapshot();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].label, "takeaway");
}

#[tokio::test]
async fn two_screens_converge_on_the_same_rows() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(vec![ticket(1, "dine-in")]));

    let mut kitchen = TableSync::new(
        counting_fetcher(Arc::clone(&data), Arc::new(AtomicUsize::new(0))),
        Duration::from_millis(20),
    );
    let mut register = TableSync::new(
        counting_fetcher(data, Arc::new(AtomicUsize::new(0))),
        Duration::from_millis(20),
    );
    kitchen.mount(&source).await.unwrap();
    register.mount(&source).await.unwrap();

    source.push(update_event(1, "ready"));
    source.push(insert_event(2, "takeaway"));
    settle().await;

    assert_eq!(kitchen.snapshot(), register.snapshot());
    assert_eq!(kitchen.snapshot().len(), 2);
}

#[tokio::test]
async fn unmount_releases_the_channel() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(vec![ticket(1, "dine-in")]));
    let mut sync = TableSync::new(
        counting_fetcher(data, Arc::new(AtomicUsize::new(0))),
        Duration::from_millis(20),
    );

    sync.mount(&source).await.unwrap();
    sync.unmount().await;

    assert_eq!(sync.state(), SyncState::Unmounted);
    assert!(source.last_feed_released());

    // A fresh mount after a full unmount opens a fresh channel.
    sync.mount(&source).await.unwrap();
    assert_eq!(source.open_count(), 2);
}

#[tokio::test]
async fn events_after_unmount_are_not_applied() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(vec![ticket(1, "dine-in")]));
    let mut sync = TableSync::new(
        counting_fetcher(data, Arc::new(AtomicUsize::new(0))),
        Duration::from_millis(20),
    );

    sync.mount(&source).await.unwrap();
    sync.unmount().await;

    source.push(insert_event(2, "takeaway"));
    settle().await;

    assert_eq!(sync.snapshot().len(), 1);
}

#[tokio::test]
async fn failed_initial_fetch_leaves_state_empty_and_retryable() {
    let source = MockSource::default();
    let fail = Arc::new(AtomicBool::new(true));
    let fetches = Arc::new(AtomicUsize::new(0));

    let fetcher: RowFetcher<Ticket> = {
        let fail = Arc::clone(&fail);
        let fetches = Arc::clone(&fetches);
        Arc::new(move || {
            let fail = Arc::clone(&fail);
            let fetches = Arc::clone(&fetches);
            Box::pin(async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                if fail.load(Ordering::SeqCst) {
                    Err(Error::validation("backing store unavailable"))
                } else {
                    Ok(vec![ticket(1, "dine-in")])
                }
            })
        })
    };
    let mut sync = TableSync::new(fetcher, Duration::from_millis(20));

    assert!(sync.mount(&source).await.is_err());
    assert_eq!(sync.state(), SyncState::Unmounted);
    assert!(sync.snapshot().is_empty());
    assert_eq!(source.open_count(), 0);

    // The caller retries by mounting again.
    fail.store(false, Ordering::SeqCst);
    sync.mount(&source).await.unwrap();
    assert_eq!(sync.state(), SyncState::Live);
    assert_eq!(sync.snapshot().len(), 1);
}

#[tokio::test]
async fn refresh_bursts_coalesce_into_one_fetch() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(vec![ticket(1, "dine-in")]));
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut sync = TableSync::new(
        counting_fetcher(Arc::clone(&data), Arc::clone(&fetches)),
        Duration::from_millis(40),
    );
    sync.mount(&source).await.unwrap();
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    data.lock().unwrap().push(ticket(2, "takeaway"));
    for _ in 0..5 {
        sync.request_refresh();
    }
    tokio::time::sleep(Duration::from_millis(120)).await;

    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(sync.snapshot().len(), 2);
}

#[tokio::test]
async fn refresh_after_unmount_is_dropped() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(vec![ticket(1, "dine-in")]));
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut sync = TableSync::new(
        counting_fetcher(data, Arc::clone(&fetches)),
        Duration::from_millis(40),
    );
    sync.mount(&source).await.unwrap();

    sync.request_refresh();
    sync.unmount().await;
    tokio::time::sleep(Duration::from_millis(120)).await;

    // Only the initial fetch ran; the scheduled refresh saw the dead
    // screen and bailed out.
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn filter_changes_cost_no_network() {
    let source = MockSource::default();
    let data = Arc::new(Mutex::new(vec![
        ticket(1, "dine-in"),
        ticket(2, "takeaway"),
        ticket(3, "dine-in"),
    ]));
    let fetches = Arc::new(AtomicUsize::new(0));
    let mut sync = TableSync::new(
        counting_fetcher(data, Arc::clone(&fetches)),
        Duration::from_millis(20),
    );
    sync.mount(&source).await.unwrap();

    let dine_in = sync.snapshot_filtered(|t| t.label == "dine-in");
    let takeaway = sync.snapshot_filtered(|t| t.label == "takeaway");
    let all = sync.snapshot_filtered(|_| true);

    assert_eq!(dine_in.len(), 2);
    assert_eq!(takeaway.len(), 1);
    assert_eq!(all.len(), 3);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
}
