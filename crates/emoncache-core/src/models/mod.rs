//! Data models for cached Emoncms data.
//!
//! - `DataPoint`: one timestamped feed sample
//! - `DateRange`, `RelativeRange`: the time window a page displays
//! - `Dashboard`: an entry of the account's dashboard list

pub mod dashboard;
pub mod feed;

pub use dashboard::Dashboard;
pub use feed::{DataPoint, DateRange, DateRangeError, RelativeRange};
