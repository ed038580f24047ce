//! Per-page refresh state.
//!
//! A page is one independently refreshable, date-ranged view of cached data,
//! such as one chart of an app. `PageState` tracks whether that view is
//! loading, failed or loaded, and publishes every change on `watch` channels
//! so any number of observers can follow it.

use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::apps::AppError;
use crate::models::DateRange;
use crate::refresh::RefreshKind;

/// Identifier of a page within one account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageId(String);

impl PageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageStatus {
    Loading,
    Error(String),
    Loaded(DateTime<Utc>),
}

impl PageStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, PageStatus::Loaded(_))
    }
}

/// What the banner bar above a page shows. It mirrors the page status.
pub type BannerBarState = PageStatus;

/// Identifies one spawned fetch, so its result can be matched to the page
/// state it was started for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub kind: RefreshKind,
    pub range: DateRange,
}

/// Receivers for one observer of a page. Dropping them affects no one else.
#[derive(Debug, Clone)]
pub struct PageSubscription {
    pub banner_bar_state: watch::Receiver<BannerBarState>,
    pub is_refreshing: watch::Receiver<bool>,
    pub errors: watch::Receiver<Option<AppError>>,
}

#[derive(Debug)]
struct PageSignals {
    banner_bar_state: watch::Sender<BannerBarState>,
    is_refreshing: watch::Sender<bool>,
    errors: watch::Sender<Option<AppError>>,
}

impl PageSignals {
    fn new() -> Self {
        let (banner_bar_state, _) = watch::channel(PageStatus::Loading);
        let (is_refreshing, _) = watch::channel(false);
        let (errors, _) = watch::channel(None);
        Self {
            banner_bar_state,
            is_refreshing,
            errors,
        }
    }
}

/// State machine for one page.
///
/// `Loading` initially; `Loading -> Loaded(t)` on success, `Loading ->
/// Error(r)` on failure, and back to `Loading` whenever a fetch starts.
/// Deactivating never changes the status.
#[derive(Debug)]
pub struct PageState {
    id: PageId,
    active: bool,
    date_range: DateRange,
    status: PageStatus,

    generation: u64,
    in_flight: Option<DateRange>,
    last_loaded_range: Option<DateRange>,
    signals: PageSignals,
}

impl PageState {
    /// A new, active page that has never loaded.
    pub fn new(id: PageId, date_range: DateRange) -> Self {
        Self {
            id,
            active: true,
            date_range,
            status: PageStatus::Loading,
            generation: 0,
            in_flight: None,
            last_loaded_range: None,
            signals: PageSignals::new(),
        }
    }

    pub fn id(&self) -> &PageId {
        &self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    pub fn status(&self) -> &PageStatus {
        &self.status
    }

    pub fn is_refreshing(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn subscribe(&self) -> PageSubscription {
        PageSubscription {
            banner_bar_state: self.signals.banner_bar_state.subscribe(),
            is_refreshing: self.signals.is_refreshing.subscribe(),
            errors: self.signals.errors.subscribe(),
        }
    }

    /// Whether a trigger right now would duplicate the fetch already running.
    pub(crate) fn would_coalesce(&self) -> bool {
        self.in_flight == Some(self.date_range)
    }

    /// Merge policy for the next fetch of this page.
    pub(crate) fn next_kind(&self) -> RefreshKind {
        match self.last_loaded_range {
            None => RefreshKind::Initial,
            Some(range) if range != self.date_range => RefreshKind::DateRangeChange,
            Some(_) => RefreshKind::Update,
        }
    }

    /// Enter `Loading` for a new fetch of the current range.
    pub(crate) fn begin_fetch(&mut self) -> FetchTicket {
        self.in_flight = Some(self.date_range);
        self.set_status(PageStatus::Loading);
        self.signals.is_refreshing.send_replace(true);
        FetchTicket {
            generation: self.generation,
            kind: self.next_kind(),
            range: self.date_range,
        }
    }

    /// Whether a result for `ticket` may still be applied. Changing the date
    /// range or deactivating the page bumps the generation.
    pub(crate) fn accepts(&self, ticket: &FetchTicket) -> bool {
        ticket.generation == self.generation && ticket.range == self.date_range
    }

    pub(crate) fn complete(&mut self, ticket: &FetchTicket, at: DateTime<Utc>) {
        self.in_flight = None;
        self.last_loaded_range = Some(ticket.range);
        self.set_status(PageStatus::Loaded(at));
        self.signals.is_refreshing.send_replace(false);
        self.signals.errors.send_replace(None);
    }

    pub(crate) fn fail(&mut self, ticket: &FetchTicket, reason: String) {
        self.in_flight = None;
        let error = match ticket.kind {
            RefreshKind::Initial => AppError::InitialFailed,
            RefreshKind::Update | RefreshKind::DateRangeChange => AppError::UpdateFailed,
        };
        self.set_status(PageStatus::Error(reason));
        self.signals.is_refreshing.send_replace(false);
        self.signals.errors.send_replace(Some(error));
    }

    /// Forget any running fetch; its result will be discarded on arrival.
    fn invalidate(&mut self) {
        self.generation += 1;
        if self.in_flight.take().is_some() {
            self.signals.is_refreshing.send_replace(false);
        }
    }

    /// Returns whether the range actually changed.
    pub(crate) fn set_date_range(&mut self, range: DateRange) -> bool {
        if range == self.date_range {
            return false;
        }
        self.date_range = range;
        self.invalidate();
        true
    }

    /// Returns whether the flag actually changed.
    pub(crate) fn set_active(&mut self, active: bool) -> bool {
        if active == self.active {
            return false;
        }
        self.active = active;
        if !active {
            self.invalidate();
        }
        true
    }

    fn set_status(&mut self, status: PageStatus) {
        self.status = status.clone();
        self.signals.banner_bar_state.send_replace(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn page(start: i64, end: i64) -> PageState {
        PageState::new(PageId::from("power"), DateRange::new(at(start), at(end)).unwrap())
    }

    #[test]
    fn test_initial_state_is_loading_and_active() {
        let page = page(0, 100);
        assert_eq!(page.status(), &PageStatus::Loading);
        assert!(page.is_active());
        assert!(!page.is_refreshing());
        assert_eq!(page.next_kind(), RefreshKind::Initial);
    }

    #[test]
    fn test_fetch_success_then_update_kind() {
        let mut page = page(0, 100);
        let ticket = page.begin_fetch();
        assert!(page.would_coalesce());
        page.complete(&ticket, at(500));
        assert_eq!(page.status(), &PageStatus::Loaded(at(500)));
        assert_eq!(page.next_kind(), RefreshKind::Update);
    }

    #[test]
    fn test_failure_sets_error_and_reloading_returns_to_loading() {
        let mut page = page(0, 100);
        let sub = page.subscribe();
        let ticket = page.begin_fetch();
        page.fail(&ticket, "boom".to_string());
        assert_eq!(page.status(), &PageStatus::Error("boom".to_string()));
        assert_eq!(*sub.errors.borrow(), Some(AppError::InitialFailed));

        page.begin_fetch();
        assert_eq!(page.status(), &PageStatus::Loading);
        assert!(*sub.is_refreshing.borrow());
    }

    #[test]
    fn test_date_range_change_rejects_old_ticket() {
        let mut page = page(0, 100);
        let old = page.begin_fetch();
        assert!(page.set_date_range(DateRange::new(at(50), at(150)).unwrap()));
        assert!(!page.accepts(&old));
        assert!(!page.would_coalesce());
        // Same range again is not a change
        assert!(!page.set_date_range(DateRange::new(at(50), at(150)).unwrap()));
    }

    #[test]
    fn test_deactivate_keeps_status_and_rejects_late_result() {
        let mut page = page(0, 100);
        let first = page.begin_fetch();
        page.complete(&first, at(10));

        let second = page.begin_fetch();
        page.set_active(false);
        assert!(!page.accepts(&second));
        assert_eq!(page.status(), &PageStatus::Loading);
        assert!(!page.is_refreshing());

        page.set_active(true);
        assert!(!page.accepts(&second));
    }

    #[test]
    fn test_dropping_one_subscriber_keeps_others() {
        let mut page = page(0, 100);
        let first = page.subscribe();
        let second = page.subscribe();
        drop(first);

        let ticket = page.begin_fetch();
        page.complete(&ticket, at(42));
        assert_eq!(*second.banner_bar_state.borrow(), PageStatus::Loaded(at(42)));
    }
}
