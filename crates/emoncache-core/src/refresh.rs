//! Refresh coordination for one account.
//!
//! `RefreshCoordinator` owns the account's `StoreHandle` and every page's
//! `PageState`, so it is the single place where cached data and page status
//! change. Fetches run as spawned Tokio tasks and report back over an MPSC
//! channel; their results are only applied when the owner drains the channel
//! with `process_pending` or `next_result`.
//!
//! Triggers are coalesced per page: while a fetch for the page's current date
//! range is running, further triggers are dropped. A date-range change is
//! never coalesced; it supersedes the running fetch, whose result is then
//! discarded on arrival. Deactivating a page discards results the same way.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::future::try_join_all;
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, EmonApi};
use crate::apps::AppError;
use crate::models::{Dashboard, DataPoint, DateRange};
use crate::page::{FetchTicket, PageId, PageState, PageSubscription};
use crate::store::{StoreError, StoreHandle};

// ============================================================================
// Constants
// ============================================================================

/// Buffer size for the fetch result channel.
/// A handful of pages per account refresh at once; 32 leaves headroom.
const CHANNEL_BUFFER_SIZE: usize = 32;

/// How fetched data is folded into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshKind {
    /// First load of a page: replaces the cached series.
    Initial,
    /// Same range again: merges by timestamp, newest value wins.
    Update,
    /// New range: drops cached points outside it, then merges.
    DateRangeChange,
}

/// Where a refresh request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Refresh button
    Manual,
    /// Pull-to-refresh gesture
    PullToRefresh,
    /// The application came to the foreground
    AppBecameActive,
    /// The page itself became visible again
    PageActivated,
}

impl TriggerSource {
    /// Automatic triggers are ignored while a page is inactive.
    pub fn is_automatic(&self) -> bool {
        matches!(self, TriggerSource::AppBecameActive | TriggerSource::PageActivated)
    }
}

/// What a page fetches from the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageSource {
    Feeds(Vec<String>),
    Dashboards,
}

/// Result of asking for a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started(RefreshKind),
    /// A fetch for the same range is already running.
    Coalesced,
    /// Automatic trigger on an inactive page, or nothing changed.
    Suppressed,
}

/// What happened to one fetch result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    Loaded(PageId),
    Failed(PageId),
    /// Result of a superseded fetch, dropped without touching the page.
    Discarded(PageId),
}

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Unknown page: {0}")]
    UnknownPage(PageId),

    #[error("Page already registered: {0}")]
    DuplicatePage(PageId),

    #[error("App configuration error: {0}")]
    App(#[from] AppError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

enum FetchOutcome {
    Feeds(Vec<(String, Vec<DataPoint>)>),
    Dashboards(Vec<Dashboard>),
}

/// Sent from a fetch task back to the coordinator.
struct RefreshResult {
    page: PageId,
    ticket: FetchTicket,
    outcome: Result<FetchOutcome, ApiError>,
}

struct Page {
    state: PageState,
    source: PageSource,
    fetches: u64,
}

/// Serialized owner of one account's store and pages.
///
/// Methods that start fetches spawn Tokio tasks and must be called from
/// within a Tokio runtime.
pub struct RefreshCoordinator<A: EmonApi> {
    api: Arc<A>,
    store: StoreHandle,
    pages: Vec<Page>,
    outstanding: usize,
    result_tx: mpsc::Sender<RefreshResult>,
    result_rx: mpsc::Receiver<RefreshResult>,
}

impl<A: EmonApi> RefreshCoordinator<A> {
    pub fn new(store: StoreHandle, api: A) -> Self {
        Self::with_shared_api(store, Arc::new(api))
    }

    pub fn with_shared_api(store: StoreHandle, api: Arc<A>) -> Self {
        let (result_tx, result_rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        Self {
            api,
            store,
            pages: Vec::new(),
            outstanding: 0,
            result_tx,
            result_rx,
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Give the store handle back, abandoning any running fetch.
    pub fn close(self) -> StoreHandle {
        info!(account = %self.store.account_id(), "Closing refresh coordinator");
        self.store
    }

    // =========================================================================
    // Pages
    // =========================================================================

    /// Register a page. It starts `Loading` and active; nothing is fetched
    /// until it is triggered.
    pub fn add_page(
        &mut self,
        id: PageId,
        source: PageSource,
        date_range: DateRange,
    ) -> Result<(), RefreshError> {
        if self.index_of(&id).is_some() {
            return Err(RefreshError::DuplicatePage(id));
        }
        debug!(page = %id, ?source, "Page added");
        self.pages.push(Page {
            state: PageState::new(id, date_range),
            source,
            fetches: 0,
        });
        Ok(())
    }

    pub fn page(&self, id: &PageId) -> Option<&PageState> {
        self.index_of(id).map(|i| &self.pages[i].state)
    }

    pub fn page_ids(&self) -> impl Iterator<Item = &PageId> {
        self.pages.iter().map(|p| p.state.id())
    }

    pub fn subscribe(&self, id: &PageId) -> Result<PageSubscription, RefreshError> {
        let index = self.require(id)?;
        Ok(self.pages[index].state.subscribe())
    }

    /// Number of fetches started for `id` so far.
    pub fn fetch_count(&self, id: &PageId) -> u64 {
        self.index_of(id).map(|i| self.pages[i].fetches).unwrap_or(0)
    }

    /// Whether any spawned fetch has not reported back yet.
    pub fn has_outstanding(&self) -> bool {
        self.outstanding > 0
    }

    fn index_of(&self, id: &PageId) -> Option<usize> {
        self.pages.iter().position(|p| p.state.id() == id)
    }

    fn require(&self, id: &PageId) -> Result<usize, RefreshError> {
        self.index_of(id)
            .ok_or_else(|| RefreshError::UnknownPage(id.clone()))
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Ask for a refresh of `id`.
    pub fn trigger(
        &mut self,
        id: &PageId,
        source: TriggerSource,
    ) -> Result<TriggerOutcome, RefreshError> {
        let index = self.require(id)?;
        let state = &self.pages[index].state;

        if source.is_automatic() && !state.is_active() {
            debug!(page = %id, ?source, "Page inactive, ignoring automatic trigger");
            return Ok(TriggerOutcome::Suppressed);
        }
        if state.would_coalesce() {
            debug!(page = %id, ?source, "Fetch already in flight, coalescing trigger");
            return Ok(TriggerOutcome::Coalesced);
        }

        Ok(TriggerOutcome::Started(self.spawn_fetch(index)))
    }

    /// Trigger every page, e.g. when the application becomes active.
    pub fn trigger_all(&mut self, source: TriggerSource) -> Vec<(PageId, TriggerOutcome)> {
        let ids: Vec<PageId> = self.page_ids().cloned().collect();
        ids.into_iter()
            .filter_map(|id| {
                let outcome = self.trigger(&id, source).ok()?;
                Some((id, outcome))
            })
            .collect()
    }

    /// Move `id` to a new date range. Any running fetch is superseded and, if
    /// the page is active, a fetch for the new range starts immediately.
    pub fn set_date_range(
        &mut self,
        id: &PageId,
        range: DateRange,
    ) -> Result<TriggerOutcome, RefreshError> {
        let index = self.require(id)?;
        let page = &mut self.pages[index];

        if !page.state.set_date_range(range) {
            return Ok(TriggerOutcome::Suppressed);
        }
        if !page.state.is_active() {
            debug!(page = %id, "Date range changed on inactive page, fetch deferred");
            return Ok(TriggerOutcome::Suppressed);
        }

        Ok(TriggerOutcome::Started(self.spawn_fetch(index)))
    }

    /// Show or hide a page. Hiding discards the result of any running fetch
    /// but keeps the last status; showing it again triggers a refresh.
    pub fn set_active(
        &mut self,
        id: &PageId,
        active: bool,
    ) -> Result<TriggerOutcome, RefreshError> {
        let index = self.require(id)?;
        if !self.pages[index].state.set_active(active) || !active {
            return Ok(TriggerOutcome::Suppressed);
        }
        self.trigger(id, TriggerSource::PageActivated)
    }

    fn spawn_fetch(&mut self, index: usize) -> RefreshKind {
        let page = &mut self.pages[index];
        let ticket = page.state.begin_fetch();
        page.fetches += 1;

        let kind = ticket.kind;
        let id = page.state.id().clone();
        let source = page.source.clone();
        let api = Arc::clone(&self.api);
        let tx = self.result_tx.clone();
        self.outstanding += 1;

        debug!(page = %id, ?kind, "Starting fetch");
        tokio::spawn(async move {
            // A panicking fetch still has to report back, or the page stays in flight
            let outcome = AssertUnwindSafe(fetch(api.as_ref(), &source, &ticket.range))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let reason = panic_message(panic.as_ref());
                    error!(page = %id, reason = %reason, "Fetch task panicked");
                    Err(ApiError::Aborted(reason))
                });
            let result = RefreshResult {
                page: id,
                ticket,
                outcome,
            };
            if tx.send(result).await.is_err() {
                debug!("Coordinator gone, dropping fetch result");
            }
        });

        kind
    }

    // =========================================================================
    // Results
    // =========================================================================

    /// Apply every result that has already arrived, without waiting.
    pub fn process_pending(&mut self) -> Vec<Applied> {
        let mut results = Vec::new();
        while let Ok(result) = self.result_rx.try_recv() {
            results.push(result);
        }
        results.into_iter().map(|r| self.apply(r)).collect()
    }

    /// Wait for the next fetch result and apply it. Returns `None` when no
    /// fetch is outstanding.
    pub async fn next_result(&mut self) -> Option<Applied> {
        if self.outstanding == 0 {
            return None;
        }
        let result = self.result_rx.recv().await?;
        Some(self.apply(result))
    }

    /// Apply results until no fetch is outstanding.
    pub async fn settle(&mut self) -> Vec<Applied> {
        let mut applied = Vec::new();
        while let Some(result) = self.next_result().await {
            applied.push(result);
        }
        applied
    }

    fn apply(&mut self, result: RefreshResult) -> Applied {
        self.outstanding = self.outstanding.saturating_sub(1);

        let RefreshResult {
            page: id,
            ticket,
            outcome,
        } = result;

        let Some(index) = self.index_of(&id) else {
            return Applied::Discarded(id);
        };
        let page = &mut self.pages[index];
        if !page.state.accepts(&ticket) {
            debug!(page = %id, generation = ticket.generation, "Discarding superseded fetch result");
            return Applied::Discarded(id);
        }

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                if e.is_transient() {
                    warn!(page = %id, error = %e, "Fetch failed");
                } else {
                    error!(page = %id, error = %e, "Fetch failed");
                }
                page.state.fail(&ticket, e.to_string());
                return Applied::Failed(id);
            }
        };

        let now = Utc::now();
        let key = id.as_str();
        let written = self.store.write(|data| {
            match outcome {
                FetchOutcome::Feeds(series) => {
                    for (feed_id, points) in series {
                        data.apply_series(key, &feed_id, points, ticket.kind, &ticket.range);
                    }
                }
                FetchOutcome::Dashboards(dashboards) => data.replace_dashboards(dashboards),
            }
            data.mark_updated(key, now);
        });

        match written {
            Ok(()) => {
                debug!(page = %id, kind = ?ticket.kind, "Fetch applied");
                page.state.complete(&ticket, now);
                Applied::Loaded(id)
            }
            Err(e) => {
                error!(page = %id, error = %e, "Failed to write fetch result to store");
                page.state.fail(&ticket, e.to_string());
                Applied::Failed(id)
            }
        }
    }
}

async fn fetch<A: EmonApi>(
    api: &A,
    source: &PageSource,
    range: &DateRange,
) -> Result<FetchOutcome, ApiError> {
    match source {
        PageSource::Feeds(feed_ids) => {
            let fetches = feed_ids.iter().map(|feed_id| async move {
                let points = api.fetch_feed_data(feed_id, range).await?;
                Ok::<_, ApiError>((feed_id.clone(), points))
            });
            Ok(FetchOutcome::Feeds(try_join_all(fetches).await?))
        }
        PageSource::Dashboards => Ok(FetchOutcome::Dashboards(api.fetch_dashboards().await?)),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic".to_string()
    }
}

// ============================================================================
// Tests
// ============================================================================
