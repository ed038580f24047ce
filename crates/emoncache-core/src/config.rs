//! Application configuration management.
//!
//! The configuration lists the accounts the user has set up (id and URL;
//! API keys live in the keychain), the apps configured for each, and an
//! optional storage root override.
//!
//! Configuration is stored at `~/.config/emoncache/config.json`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::AccountIdentity;
use crate::apps::AppConfig;
use crate::store::{StoreError, StoreRoot};

/// Application name used for config directory paths
const APP_NAME: &str = "emoncache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides the storage root
pub const STORAGE_ROOT_ENV: &str = "EMONCACHE_STORAGE_ROOT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: Uuid,
    pub url: String,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
}

impl AccountEntry {
    pub fn identity(&self, api_key: impl Into<String>) -> AccountIdentity {
        AccountIdentity::new(self.id, self.url.clone(), api_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
    pub selected_account: Option<Uuid>,
    pub storage_root: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Storage root: the environment override, then the config, then the
    /// platform data directory.
    pub fn store_root(&self) -> Result<StoreRoot, StoreError> {
        let override_path = std::env::var_os(STORAGE_ROOT_ENV)
            .map(PathBuf::from)
            .or_else(|| self.storage_root.clone());
        StoreRoot::resolve(override_path)
    }

    pub fn account(&self, id: Uuid) -> Option<&AccountEntry> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn account_mut(&mut self, id: Uuid) -> Option<&mut AccountEntry> {
        self.accounts.iter_mut().find(|a| a.id == id)
    }

    /// Add an account, or update the URL of an existing one.
    /// Returns true when the account is new.
    pub fn upsert_account(&mut self, identity: &AccountIdentity) -> bool {
        if let Some(entry) = self.account_mut(identity.id()) {
            entry.url = identity.endpoint_url().to_string();
            return false;
        }
        self.accounts.push(AccountEntry {
            id: identity.id(),
            url: identity.endpoint_url().to_string(),
            apps: Vec::new(),
        });
        if self.selected_account.is_none() {
            self.selected_account = Some(identity.id());
        }
        true
    }

    /// Remove an account. Returns the removed entry if it existed.
    pub fn remove_account(&mut self, id: Uuid) -> Option<AccountEntry> {
        let index = self.accounts.iter().position(|a| a.id == id)?;
        let removed = self.accounts.remove(index);
        if self.selected_account == Some(id) {
            self.selected_account = self.accounts.first().map(|a| a.id);
        }
        Some(removed)
    }
}
