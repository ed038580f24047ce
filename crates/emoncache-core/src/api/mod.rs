//! Emoncms API collaborator.
//!
//! The core never talks HTTP itself: it consumes the `EmonApi` trait, which
//! returns decoded feed samples and dashboard lists or a failure. `HttpEmonApi`
//! is the reqwest-backed implementation used by the binary; tests substitute
//! their own.
//!
//! Retries and rate limiting are the server's and caller's business, not this
//! module's: every call is a single request.

pub mod client;
pub mod error;

use std::future::Future;

use crate::models::{Dashboard, DataPoint, DateRange};

pub use client::HttpEmonApi;
pub use error::ApiError;

/// Source of remote data for one account.
pub trait EmonApi: Send + Sync + 'static {
    /// Samples of `feed_id` within `range`, oldest first.
    fn fetch_feed_data(
        &self,
        feed_id: &str,
        range: &DateRange,
    ) -> impl Future<Output = Result<Vec<DataPoint>, ApiError>> + Send;

    fn fetch_dashboards(&self) -> impl Future<Output = Result<Vec<Dashboard>, ApiError>> + Send;
}
