//! Live table sync for back-office screens.
//!
//! A `TableSync` owns one screen's copy of one table: an initial full
//! fetch, then row-level merges driven by the change feed. At most one
//! feed channel exists per instance no matter how often the screen
//! remounts, and filter changes re-project the rows already held instead
//! of refetching.
//!
//! Change notifications are applied by row id, so redelivered events
//! converge to the same rows. When a screen prefers whole-table refreshes
//! over row merges it calls `request_refresh`; bursts inside the debounce
//! window collapse into a single fetch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use log::{debug, trace, warn};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use brigade_realtime::{ChangeClient, ChangeEvent, ChangeOp};

use crate::error::Result;
use crate::models::{MenuItem, Order};

/// A row type that can live in a `TableSync`.
pub trait SyncedRow: DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table name on the backing store.
    const TABLE: &'static str;

    /// Stable key used to merge change events into the local rows.
    fn row_id(&self) -> String;
}

impl SyncedRow for MenuItem {
    const TABLE: &'static str = "menu_items";

    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

impl SyncedRow for Order {
    const TABLE: &'static str = "orders";

    fn row_id(&self) -> String {
        self.id.to_string()
    }
}

/// Where change events come from. The production source is the websocket
/// [`ChangeClient`]; tests plug in their own.
#[async_trait]
pub trait ChangeSource: Send + Sync {
    /// Open a feed for `table`, delivering events into `events`. The
    /// returned guard keeps the feed alive until released.
    async fn open(
        &self,
        table: &str,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<Box<dyn FeedGuard>>;
}

/// Handle to an open change feed.
#[async_trait]
pub trait FeedGuard: Send {
    async fn release(&mut self);
}

struct RealtimeFeed {
    handle: brigade_realtime::ChannelHandle,
}

#[async_trait]
impl FeedGuard for RealtimeFeed {
    async fn release(&mut self) {
        self.handle.close().await;
    }
}

#[async_trait]
impl ChangeSource for ChangeClient {
    async fn open(
        &self,
        table: &str,
        events: mpsc::Sender<ChangeEvent>,
    ) -> Result<Box<dyn FeedGuard>> {
        let handle = self
            .table_changes(table)
            .on_change(move |event| {
                if events.try_send(event).is_err() {
                    warn!("change event dropped, apply queue full or closed");
                }
            })
            .subscribe()
            .await?;
        Ok(Box::new(RealtimeFeed { handle }))
    }
}

/// Lifecycle of one `TableSync` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unmounted,
    FetchingInitial,
    Live,
    Unmounting,
}

/// Full-table fetch used for the initial load and debounced refreshes.
pub type RowFetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<Vec<T>>> + Send + Sync>;

pub struct TableSync<T: SyncedRow> {
    fetcher: RowFetcher<T>,
    rows: Arc<Mutex<Vec<T>>>,
    state: Arc<Mutex<SyncState>>,
    subscribed: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
    refresh_pending: Arc<AtomicBool>,
    refresh_debounce: Duration,
    feed: Option<Box<dyn FeedGuard>>,
    apply_task: Option<JoinHandle<()>>,
}

impl<T: SyncedRow> TableSync<T> {
    pub fn new(fetcher: RowFetcher<T>, refresh_debounce: Duration) -> Self {
        Self {
            fetcher,
            rows: Arc::new(Mutex::new(Vec::new())),
            state: Arc::new(Mutex::new(SyncState::Unmounted)),
            subscribed: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(false)),
            refresh_pending: Arc::new(AtomicBool::new(false)),
            refresh_debounce,
            feed: None,
            apply_task: None,
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock().unwrap()
    }

    pub fn is_live(&self) -> bool {
        self.state() == SyncState::Live
    }

    /// Copy of the rows as last synced, newest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.rows.lock().unwrap().clone()
    }

    /// Re-project the held rows through a predicate. Changing a screen
    /// filter costs no network traffic.
    pub fn snapshot_filtered(&self, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    /// Fetch the full table and open the change feed. Calling `mount` on
    /// an already-live instance is a no-op; the existing channel is kept.
    ///
    /// On failure the local rows are cleared and the instance returns to
    /// unmounted, so the caller retries by mounting again.
    pub async fn mount(&mut self, source: &dyn ChangeSource) -> Result<()> {
        if self.subscribed.load(Ordering::SeqCst) {
            debug!("{} sync already live, keeping existing channel", T::TABLE);
            return Ok(());
        }

        self.set_state(SyncState::FetchingInitial);
        self.alive.store(true, Ordering::SeqCst);

        let initial = match (self.fetcher)().await {
            Ok(rows) => rows,
            Err(e) => {
                self.abort_mount();
                return Err(e);
            }
        };
        *self.rows.lock().unwrap() = initial;

        let (tx, mut rx) = mpsc::channel(64);
        let feed = match source.open(T::TABLE, tx).await {
            Ok(feed) => feed,
            Err(e) => {
                self.abort_mount();
                return Err(e);
            }
        };
        self.feed = Some(feed);
        self.subscribed.store(true, Ordering::SeqCst);

        let rows = Arc::clone(&self.rows);
        let alive = Arc::clone(&self.alive);
        self.apply_task = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !alive.load(Ordering::SeqCst) {
                    break;
                }
                apply_change(&rows, &event);
            }
        }));

        self.set_state(SyncState::Live);
        debug!("{} sync live", T::TABLE);
        Ok(())
    }

    /// Schedule a full refetch after the debounce window. Further requests
    /// inside the window coalesce into the already-scheduled fetch. A
    /// refresh that fails keeps the last known rows.
    pub fn request_refresh(&self) {
        if !self.alive.load(Ordering::SeqCst) {
            trace!("{} sync not live, refresh ignored", T::TABLE);
            return;
        }
        if self.refresh_pending.swap(true, Ordering::SeqCst) {
            trace!("{} refresh already scheduled, coalescing", T::TABLE);
            return;
        }

        let fetcher = Arc::clone(&self.fetcher);
        let rows = Arc::clone(&self.rows);
        let alive = Arc::clone(&self.alive);
        let refresh_pending = Arc::clone(&self.refresh_pending);
        let window = self.refresh_debounce;

        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            refresh_pending.store(false, Ordering::SeqCst);
            if !alive.load(Ordering::SeqCst) {
                return;
            }
            match fetcher().await {
                Ok(fresh) => {
                    // Re-check: the screen may have unmounted while the
                    // fetch was in flight.
                    if alive.load(Ordering::SeqCst) {
                        *rows.lock().unwrap() = fresh;
                    } else {
                        debug!("{} refresh finished after unmount, dropped", T::TABLE);
                    }
                }
                Err(e) => warn!("{} refresh failed, keeping last rows: {}", T::TABLE, e),
            }
        });
    }

    /// Release the change feed and stop applying events. In-flight
    /// refresh results are dropped rather than applied to a dead screen.
    pub async fn unmount(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        if !self.subscribed.load(Ordering::SeqCst) {
            return;
        }

        self.set_state(SyncState::Unmounting);
        if let Some(mut feed) = self.feed.take() {
            feed.release().await;
        }
        if let Some(task) = self.apply_task.take() {
            task.abort();
        }
        self.subscribed.store(false, Ordering::SeqCst);
        self.set_state(SyncState::Unmounted);
        debug!("{} sync unmounted", T::TABLE);
    }

    fn abort_mount(&mut self) {
        self.rows.lock().unwrap().clear();
        self.alive.store(false, Ordering::SeqCst);
        self.set_state(SyncState::Unmounted);
    }

    fn set_state(&self, next: SyncState) {
        *self.state.lock().unwrap() = next;
    }
}

impl<T: SyncedRow> Drop for TableSync<T> {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.subscribed.store(false, Ordering::SeqCst);
        if let Some(task) = self.apply_task.take() {
            task.abort();
        }
        // Dropping the feed guard releases the channel in the background.
    }
}

/// Merge one change event into the local rows, keyed by row id. Events
/// may be redelivered; every arm is idempotent.
fn apply_change<T: SyncedRow>(rows: &Mutex<Vec<T>>, event: &ChangeEvent) {
    let Some(id) = event.row_id() else {
        warn!("{} change event without a row id ignored", event.table);
        return;
    };

    match event.op {
        ChangeOp::Insert => match serde_json::from_value::<T>(event.row.clone()) {
            Ok(row) => {
                let mut rows = rows.lock().unwrap();
                if rows.iter().any(|r| r.row_id() == id) {
                    trace!("insert for already-known row {} ignored", id);
                } else {
                    rows.insert(0, row);
                }
            }
            Err(e) => warn!("undecodable inserted row {}: {}", id, e),
        },
        ChangeOp::Update => match serde_json::from_value::<T>(event.row.clone()) {
            Ok(row) => {
                let mut rows = rows.lock().unwrap();
                match rows.iter().position(|r| r.row_id() == id) {
                    Some(index) => rows[index] = row,
                    // An update for a row this instance never saw still
                    // lands, so redelivery order does not matter.
                    None => rows.insert(0, row),
                }
            }
            Err(e) => warn!("undecodable updated row {}: {}", id, e),
        },
        ChangeOp::Delete => {
            rows.lock().unwrap().retain(|r| r.row_id() != id);
        }
    }
}
