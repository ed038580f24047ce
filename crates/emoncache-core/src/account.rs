//! Account identity.
//!
//! An `AccountIdentity` names one configured Emoncms account: an opaque id,
//! the instance URL and the API key. The id alone decides where the account's
//! store lives; the URL and key are its current configuration.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extension of per-account store files.
const STORE_FILE_EXTENSION: &str = "json";

/// The URL/API key pair used to talk to an Emoncms instance.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub url: String,
    pub api_key: String,
}

impl AccountCredentials {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("url", &self.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Immutable identity of one configured account. Equality is structural.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccountIdentity {
    id: Uuid,
    credentials: AccountCredentials,
}

impl AccountIdentity {
    pub fn new(id: Uuid, endpoint_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id,
            credentials: AccountCredentials::new(endpoint_url, api_key),
        }
    }

    /// A brand-new account with a random id.
    pub fn generate(endpoint_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::new(Uuid::new_v4(), endpoint_url, api_key)
    }

    pub fn from_credentials(id: Uuid, credentials: AccountCredentials) -> Self {
        Self { id, credentials }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn endpoint_url(&self) -> &str {
        &self.credentials.url
    }

    pub fn api_key(&self) -> &str {
        &self.credentials.api_key
    }

    pub fn credentials(&self) -> &AccountCredentials {
        &self.credentials
    }

    /// Whether both identities refer to the same account, whatever its configuration.
    pub fn same_account(&self, other: &AccountIdentity) -> bool {
        self.id == other.id
    }

    /// Same account, but the URL or key changed: the store must be re-validated
    /// against the new configuration rather than treated as a new account.
    pub fn needs_revalidation(&self, other: &AccountIdentity) -> bool {
        self.same_account(other) && self.credentials != other.credentials
    }

    /// File name of this account's store, derived only from the id.
    pub fn store_file_name(&self) -> String {
        format!("{}.{}", self.id.as_hyphenated(), STORE_FILE_EXTENSION)
    }
}

impl fmt::Debug for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountIdentity")
            .field("id", &self.id)
            .field("endpoint_url", &self.credentials.url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.credentials.url)
    }
}
