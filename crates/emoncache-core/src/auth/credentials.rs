use anyhow::{Context, Result};
use keyring::Entry;
use uuid::Uuid;

use crate::account::AccountIdentity;

const SERVICE_NAME: &str = "emoncache";

pub struct CredentialStore;

impl CredentialStore {
    fn entry(account_id: Uuid) -> Result<Entry> {
        Entry::new(SERVICE_NAME, &account_id.to_string()).context("Failed to create keyring entry")
    }

    /// Store the account's API key in the OS keychain
    pub fn store(identity: &AccountIdentity) -> Result<()> {
        Self::entry(identity.id())?
            .set_password(identity.api_key())
            .context("Failed to store API key in keychain")?;
        Ok(())
    }

    /// Retrieve the API key for an account from the OS keychain
    pub fn get_api_key(account_id: Uuid) -> Result<String> {
        Self::entry(account_id)?
            .get_password()
            .context("Failed to retrieve API key from keychain")
    }

    /// Delete the stored API key for an account
    pub fn delete(account_id: Uuid) -> Result<()> {
        Self::entry(account_id)?
            .delete_credential()
            .context("Failed to delete API key from keychain")?;
        Ok(())
    }

    /// Check if an API key exists for an account
    pub fn has_credentials(account_id: Uuid) -> bool {
        if let Ok(entry) = Self::entry(account_id) {
            entry.get_password().is_ok()
        } else {
            false
        }
    }
}
