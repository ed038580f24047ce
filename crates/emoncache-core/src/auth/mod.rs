//! Credential storage.
//!
//! API keys are kept out of the config file and stored in the OS keychain,
//! one entry per account id, through `CredentialStore`.

pub mod credentials;

pub use credentials::CredentialStore;
