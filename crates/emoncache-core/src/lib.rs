//! emoncache core library.
//!
//! Per-account local cache and refresh coordination for an Emoncms dashboard
//! viewer. Each configured account gets its own schema-versioned store file,
//! and every refreshable view of that data (a "page") runs a small state
//! machine that the UI layer observes through `watch` channels.
//!
//! The pieces, leaves first:
//! - `account`: `AccountIdentity`, the immutable id/url/key triple
//! - `store`: `AccountStore`, one exclusively-owned JSON store per account
//! - `api`: the `EmonApi` collaborator and its reqwest implementation
//! - `refresh`: `RefreshCoordinator`, trigger coalescing and result application
//! - `page`: `PageState` and its observable signals
//! - `composite`: `CompositeViewState`, readiness over pages sharing a date range
//! - `apps`: the closed set of Emoncms app categories and their feed fields

pub mod account;
pub mod api;
pub mod apps;
pub mod auth;
pub mod composite;
pub mod config;
pub mod models;
pub mod page;
pub mod refresh;
pub mod store;

pub use account::{AccountCredentials, AccountIdentity};
pub use api::{ApiError, EmonApi, HttpEmonApi};
pub use apps::{AppCategory, AppConfig, AppError};
pub use composite::{CompositeViewState, Readiness};
pub use models::{Dashboard, DataPoint, DateRange, RelativeRange};
pub use page::{BannerBarState, PageId, PageState, PageStatus};
pub use refresh::{PageSource, RefreshCoordinator, RefreshError, RefreshKind, TriggerSource};
pub use store::{AccountStore, StoreError, StoreHandle, StoreRoot};
