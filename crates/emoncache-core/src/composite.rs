//! Readiness of a group of pages that share one date range.
//!
//! An app shows several pages (power, usage, ...) over the same time window.
//! `CompositeViewState` keeps their ranges equal and folds their statuses
//! into one signal: ready only when every page is loaded, reporting the
//! oldest load time, and failed as soon as any page failed.

use chrono::{DateTime, Utc};
use futures::future::select_all;
use tokio::sync::watch;
use tracing::debug;

use crate::api::EmonApi;
use crate::apps::AppConfig;
use crate::models::DateRange;
use crate::page::{PageId, PageStatus};
use crate::refresh::{RefreshCoordinator, RefreshError, TriggerOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Loading,
    /// First failed page in page order.
    Error { page: PageId, reason: String },
    /// All pages loaded; the timestamp is the oldest of their load times.
    Loaded(DateTime<Utc>),
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Loaded(_))
    }

    /// Fold page statuses, given in page order.
    pub fn from_statuses<'a, I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = (&'a PageId, &'a PageStatus)>,
    {
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut all_loaded = true;

        for (page, status) in statuses {
            match status {
                PageStatus::Error(reason) => {
                    return Readiness::Error {
                        page: page.clone(),
                        reason: reason.clone(),
                    }
                }
                PageStatus::Loading => all_loaded = false,
                PageStatus::Loaded(at) => {
                    oldest = Some(oldest.map_or(*at, |o| o.min(*at)));
                }
            }
        }

        match oldest {
            Some(at) if all_loaded => Readiness::Loaded(at),
            _ => Readiness::Loading,
        }
    }
}

/// Receivers for one observer of a composite.
#[derive(Debug, Clone)]
pub struct CompositeSignals {
    pub title: watch::Receiver<String>,
    pub readiness: watch::Receiver<Readiness>,
}

impl CompositeSignals {
    pub fn is_ready(&self) -> bool {
        self.readiness.borrow().is_ready()
    }
}

#[derive(Debug)]
pub struct CompositeViewState {
    pages: Vec<PageId>,
    shared_date_range: DateRange,
    title: watch::Sender<String>,
}

impl CompositeViewState {
    /// Group `pages`, which must already be registered with the coordinator,
    /// and move them all to `shared_date_range`.
    pub fn new<A: EmonApi>(
        title: impl Into<String>,
        pages: Vec<PageId>,
        shared_date_range: DateRange,
        coordinator: &mut RefreshCoordinator<A>,
    ) -> Result<Self, RefreshError> {
        for page in &pages {
            coordinator.set_date_range(page, shared_date_range)?;
        }
        let (title, _) = watch::channel(title.into());
        Ok(Self {
            pages,
            shared_date_range,
            title,
        })
    }

    /// Register every page of `app` with the coordinator and group them.
    pub fn for_app<A: EmonApi>(
        app: &AppConfig,
        shared_date_range: DateRange,
        coordinator: &mut RefreshCoordinator<A>,
    ) -> Result<Self, RefreshError> {
        let mut pages = Vec::new();
        for (id, source) in app.page_sources()? {
            coordinator.add_page(id.clone(), source, shared_date_range)?;
            pages.push(id);
        }
        Self::new(app.name.clone(), pages, shared_date_range, coordinator)
    }

    pub fn pages(&self) -> &[PageId] {
        &self.pages
    }

    pub fn shared_date_range(&self) -> DateRange {
        self.shared_date_range
    }

    pub fn title(&self) -> String {
        self.title.borrow().clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.title.send_replace(title.into());
    }

    /// Move every member page to `range`; each one re-fetches on its own.
    pub fn set_date_range<A: EmonApi>(
        &mut self,
        range: DateRange,
        coordinator: &mut RefreshCoordinator<A>,
    ) -> Result<Vec<TriggerOutcome>, RefreshError> {
        self.shared_date_range = range;
        self.pages
            .iter()
            .map(|page| coordinator.set_date_range(page, range))
            .collect()
    }

    pub fn readiness<A: EmonApi>(&self, coordinator: &RefreshCoordinator<A>) -> Readiness {
        let statuses: Vec<(&PageId, &PageStatus)> = self
            .pages
            .iter()
            .filter_map(|id| coordinator.page(id).map(|p| (id, p.status())))
            .collect();
        Readiness::from_statuses(statuses)
    }

    /// Subscribe to title and readiness. Readiness is recomputed by a spawned
    /// task whenever any member page's status changes; the task ends when the
    /// coordinator is dropped or every readiness receiver is gone.
    pub fn watch<A: EmonApi>(
        &self,
        coordinator: &RefreshCoordinator<A>,
    ) -> Result<CompositeSignals, RefreshError> {
        let mut members = Vec::with_capacity(self.pages.len());
        for page in &self.pages {
            members.push((page.clone(), coordinator.subscribe(page)?.banner_bar_state));
        }

        let (readiness_tx, readiness_rx) = watch::channel(current_readiness(&mut members));

        if !members.is_empty() {
            tokio::spawn(async move {
                loop {
                    let changes = members
                        .iter_mut()
                        .map(|(_, rx)| Box::pin(rx.changed()));
                    let (changed, _, _) = select_all(changes).await;
                    if changed.is_err() {
                        debug!("Page signals closed, stopping composite watcher");
                        break;
                    }
                    if readiness_tx.send(current_readiness(&mut members)).is_err() {
                        break;
                    }
                }
            });
        }

        Ok(CompositeSignals {
            title: self.title.subscribe(),
            readiness: readiness_rx,
        })
    }
}

fn current_readiness(members: &mut [(PageId, watch::Receiver<PageStatus>)]) -> Readiness {
    let statuses: Vec<(PageId, PageStatus)> = members
        .iter_mut()
        .map(|(id, rx)| (id.clone(), rx.borrow_and_update().clone()))
        .collect();
    Readiness::from_statuses(statuses.iter().map(|(id, status)| (id, status)))
}
