//! Per-account local store.
//!
//! This module provides `AccountStore`, which owns one JSON store file per
//! account under an injected `StoreRoot`. Each file embeds a schema version
//! that is checked on every open; a mismatch discards the file and starts
//! over with an empty store, since everything in it can be re-fetched from
//! the account's Emoncms instance.
//!
//! At most one `StoreHandle` per account is open at a time. The handle is the
//! only way to read or write the store, and dropping it releases the account.

pub mod data;
pub mod error;
pub mod manager;

pub use data::{PageSeries, StoreData, SCHEMA_VERSION};
pub use error::StoreError;
pub use manager::{AccountStore, StoreHandle, StoreRoot};
