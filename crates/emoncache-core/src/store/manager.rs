use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::AccountIdentity;
use crate::models::{Dashboard, DataPoint, DateRange};
use crate::refresh::RefreshKind;

use super::data::{StoreData, VersionProbe, SCHEMA_VERSION};
use super::StoreError;

/// Directory name used under the platform data directory
const APP_NAME: &str = "emoncache";

/// Suffix of the scratch file a store is written through before renaming
const TEMP_SUFFIX: &str = "tmp";

/// The resolved directory that holds every account's store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreRoot {
    path: PathBuf,
}

impl StoreRoot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Use `override_path` if given, otherwise the platform data directory.
    pub fn resolve(override_path: Option<PathBuf>) -> Result<Self, StoreError> {
        if let Some(path) = override_path {
            return Ok(Self::new(path));
        }
        let data_dir = dirs::data_dir()
            .ok_or_else(|| StoreError::unavailable(None, "Could not find data directory"))?;
        Ok(Self::new(data_dir.join(APP_NAME)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_path(&self, identity: &AccountIdentity) -> PathBuf {
        self.path.join(identity.store_file_name())
    }
}

type OpenPaths = Arc<Mutex<HashSet<PathBuf>>>;

fn lock_paths(paths: &OpenPaths) -> MutexGuard<'_, HashSet<PathBuf>> {
    // The set holds no invariants a panicking holder could break
    paths.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Exclusive claim on one store path. Released on drop.
#[derive(Debug)]
struct PathClaim {
    path: PathBuf,
    open_paths: OpenPaths,
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        lock_paths(&self.open_paths).remove(&self.path);
        debug!(path = ?self.path, "Store handle released");
    }
}

/// Opens, migrates and deletes per-account stores under one `StoreRoot`.
///
/// Clones share the registry of open handles, so every clone enforces the
/// same one-handle-per-account rule.
#[derive(Debug, Clone)]
pub struct AccountStore {
    root: StoreRoot,
    schema_version: u32,
    open_paths: OpenPaths,
}

impl AccountStore {
    pub fn new(root: StoreRoot) -> Self {
        Self::with_schema_version(root, SCHEMA_VERSION)
    }

    /// A manager that expects stores of `schema_version` on open.
    pub fn with_schema_version(root: StoreRoot, schema_version: u32) -> Self {
        Self {
            root,
            schema_version,
            open_paths: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn root(&self) -> &StoreRoot {
        &self.root
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn is_open(&self, identity: &AccountIdentity) -> bool {
        lock_paths(&self.open_paths).contains(&self.root.store_path(identity))
    }

    /// Open the account's store, creating it if needed.
    ///
    /// A store written with another schema version, or one that cannot be
    /// parsed, is deleted and replaced by an empty store. Callers should
    /// re-sync from the remote instance afterwards.
    pub fn open(&self, identity: &AccountIdentity) -> Result<StoreHandle, StoreError> {
        self.ensure_root()?;

        let path = self.root.store_path(identity);
        let claim = self.claim(&path, identity.id())?;

        let data = match self.read(&path, identity.id())? {
            Some(data) => data,
            None => StoreData::empty(identity.id(), self.schema_version),
        };

        let handle = StoreHandle { claim, data };
        // First write of the session: failing here means the root is not writable
        handle.persist().map_err(|e| match e {
            StoreError::Io(io) => StoreError::unavailable(Some(self.root.path().to_path_buf()), io.to_string()),
            other => other,
        })?;
        info!(account = %identity.id(), path = ?handle.path(), "Store opened");
        Ok(handle)
    }

    /// Release a handle. Equivalent to dropping it.
    pub fn close(&self, handle: StoreHandle) {
        debug!(account = %handle.account_id(), "Closing store");
        drop(handle);
    }

    /// Remove the account's store file. Fails if a handle is open.
    pub fn delete(&self, identity: &AccountIdentity) -> Result<(), StoreError> {
        let path = self.root.store_path(identity);
        let open_paths = lock_paths(&self.open_paths);
        if open_paths.contains(&path) {
            return Err(StoreError::StoreBusy(identity.id()));
        }

        remove_if_exists(&path)?;
        remove_if_exists(&temp_path(&path))?;
        info!(account = %identity.id(), "Store deleted");
        Ok(())
    }

    fn ensure_root(&self) -> Result<(), StoreError> {
        let root = self.root.path();
        std::fs::create_dir_all(root)
            .map_err(|e| StoreError::unavailable(Some(root.to_path_buf()), e.to_string()))?;
        if !root.is_dir() {
            return Err(StoreError::unavailable(
                Some(root.to_path_buf()),
                "Storage root is not a directory",
            ));
        }
        Ok(())
    }

    fn claim(&self, path: &Path, account_id: Uuid) -> Result<PathClaim, StoreError> {
        let mut open_paths = lock_paths(&self.open_paths);
        if !open_paths.insert(path.to_path_buf()) {
            return Err(StoreError::StoreBusy(account_id));
        }
        Ok(PathClaim {
            path: path.to_path_buf(),
            open_paths: Arc::clone(&self.open_paths),
        })
    }

    /// Load the store at `path`. Returns `None` when there is nothing usable
    /// on disk, after removing whatever was there.
    fn read(&self, path: &Path, account_id: Uuid) -> Result<Option<StoreData>, StoreError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let found_version = serde_json::from_str::<VersionProbe>(&contents)
            .map(|header| header.schema_version)
            .ok();

        if found_version != Some(self.schema_version) {
            warn!(
                account = %account_id,
                found = ?found_version,
                expected = self.schema_version,
                "Store schema mismatch, recreating empty store"
            );
            remove_if_exists(path)?;
            return Ok(None);
        }

        match serde_json::from_str::<StoreData>(&contents) {
            Ok(data) if data.account_id == account_id => Ok(Some(data)),
            Ok(data) => {
                warn!(
                    account = %account_id,
                    found = %data.account_id,
                    "Store belongs to another account, recreating empty store"
                );
                remove_if_exists(path)?;
                Ok(None)
            }
            Err(e) => {
                warn!(account = %account_id, error = %e, "Store unreadable, recreating empty store");
                remove_if_exists(path)?;
                Ok(None)
            }
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(TEMP_SUFFIX);
    PathBuf::from(name)
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Exclusive, open store for one account.
#[derive(Debug)]
pub struct StoreHandle {
    claim: PathClaim,
    data: StoreData,
}

impl StoreHandle {
    pub fn account_id(&self) -> Uuid {
        self.data.account_id
    }

    pub fn path(&self) -> &Path {
        &self.claim.path
    }

    pub fn schema_version(&self) -> u32 {
        self.data.schema_version
    }

    pub fn data(&self) -> &StoreData {
        &self.data
    }

    pub fn series(&self, page: &str, feed_id: &str) -> &[DataPoint] {
        self.data.series(page, feed_id)
    }

    pub fn dashboards(&self) -> &[Dashboard] {
        &self.data.dashboards
    }

    pub fn last_updated(&self, key: &str) -> Option<DateTime<Utc>> {
        self.data.last_updated(key)
    }

    /// Apply `change` to a copy of the data and persist it. The in-memory
    /// data is only replaced once the write succeeded, so a failed write
    /// leaves both memory and disk as they were.
    pub fn write<F>(&mut self, change: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut StoreData),
    {
        let mut next = self.data.clone();
        change(&mut next);
        write_atomically(&self.claim.path, &next)?;
        self.data = next;
        Ok(())
    }

    pub fn apply_series(
        &mut self,
        page: &str,
        feed_id: &str,
        points: Vec<DataPoint>,
        kind: RefreshKind,
        range: &DateRange,
    ) -> Result<(), StoreError> {
        self.write(|data| data.apply_series(page, feed_id, points, kind, range))
    }

    pub fn replace_dashboards(&mut self, dashboards: Vec<Dashboard>) -> Result<(), StoreError> {
        self.write(|data| data.replace_dashboards(dashboards))
    }

    fn persist(&self) -> Result<(), StoreError> {
        write_atomically(&self.claim.path, &self.data)
    }
}

fn write_atomically(path: &Path, data: &StoreData) -> Result<(), StoreError> {
    let contents = serde_json::to_string(data)?;
    let temp = temp_path(path);
    std::fs::write(&temp, contents)?;
    std::fs::rename(&temp, path)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn store_in(dir: &TempDir) -> AccountStore {
        AccountStore::new(StoreRoot::new(dir.path()))
    }

    #[test]
    fn test_open_new_account_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = AccountIdentity::generate("https://x", "k");

        let handle = store.open(&identity).unwrap();
        assert!(handle.data().is_empty());
        assert_eq!(handle.schema_version(), SCHEMA_VERSION);
        assert!(dir.path().join(identity.store_file_name()).exists());
    }

    #[test]
    fn test_second_open_is_busy_until_closed() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = AccountIdentity::generate("https://x", "k");

        let handle = store.open(&identity).unwrap();
        assert!(matches!(store.open(&identity), Err(StoreError::StoreBusy(_))));
        assert!(matches!(store.clone().open(&identity), Err(StoreError::StoreBusy(_))));

        store.close(handle);
        assert!(!store.is_open(&identity));
        assert!(store.open(&identity).is_ok());
    }

    #[test]
    fn test_data_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = AccountIdentity::generate("https://x", "k");
        let range = DateRange::new(at(0), at(100)).unwrap();

        let mut handle = store.open(&identity).unwrap();
        handle
            .apply_series("power", "use", vec![DataPoint::new(at(10), 1.0)], RefreshKind::Initial, &range)
            .unwrap();
        store.close(handle);

        let handle = store.open(&identity).unwrap();
        assert_eq!(handle.series("power", "use").len(), 1);
    }

    #[test]
    fn test_schema_mismatch_recreates_empty_store() {
        let dir = TempDir::new().unwrap();
        let identity = AccountIdentity::generate("https://x", "k");
        let range = DateRange::new(at(0), at(100)).unwrap();

        let old = AccountStore::with_schema_version(StoreRoot::new(dir.path()), 1);
        let mut handle = old.open(&identity).unwrap();
        handle
            .apply_series("power", "use", vec![DataPoint::new(at(10), 1.0)], RefreshKind::Initial, &range)
            .unwrap();
        old.close(handle);

        let new = AccountStore::with_schema_version(StoreRoot::new(dir.path()), 2);
        let handle = new.open(&identity).unwrap();
        assert!(handle.data().is_empty());
        assert_eq!(handle.schema_version(), 2);
    }

    #[test]
    fn test_corrupt_store_is_recreated() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = AccountIdentity::generate("https://x", "k");
        std::fs::write(dir.path().join(identity.store_file_name()), "{not json").unwrap();

        let handle = store.open(&identity).unwrap();
        assert!(handle.data().is_empty());
    }

    #[test]
    fn test_delete_while_open_is_busy() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = AccountIdentity::generate("https://x", "k");

        let handle = store.open(&identity).unwrap();
        assert!(matches!(store.delete(&identity), Err(StoreError::StoreBusy(_))));

        drop(handle);
        store.delete(&identity).unwrap();
        assert!(!dir.path().join(identity.store_file_name()).exists());
        // Deleting again is a no-op
        store.delete(&identity).unwrap();
    }

    #[test]
    fn test_accounts_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let a = AccountIdentity::generate("https://x", "k");
        let b = AccountIdentity::generate("https://x", "k");
        let range = DateRange::new(at(0), at(100)).unwrap();

        let mut handle_a = store.open(&a).unwrap();
        let handle_b = store.open(&b).unwrap();
        let b_before = std::fs::read_to_string(handle_b.path()).unwrap();

        handle_a
            .apply_series("power", "use", vec![DataPoint::new(at(10), 1.0)], RefreshKind::Initial, &range)
            .unwrap();
        assert_eq!(std::fs::read_to_string(handle_b.path()).unwrap(), b_before);
        assert!(handle_b.series("power", "use").is_empty());

        store.close(handle_b);
        store.delete(&b).unwrap();
        assert_eq!(handle_a.series("power", "use").len(), 1);

        drop(handle_a);
        let handle_a = store.open(&a).unwrap();
        assert_eq!(handle_a.series("power", "use").len(), 1);
    }

    #[test]
    fn test_store_of_other_account_is_not_adopted() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let a = AccountIdentity::generate("https://x", "k");
        let b = AccountIdentity::generate("https://x", "k");

        let handle = store.open(&a).unwrap();
        let contents = std::fs::read_to_string(handle.path()).unwrap();
        drop(handle);
        std::fs::write(dir.path().join(b.store_file_name()), contents).unwrap();

        let handle = store.open(&b).unwrap();
        assert_eq!(handle.account_id(), b.id());
    }

    #[test]
    fn test_unusable_root_is_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, "x").unwrap();
        let store = AccountStore::new(StoreRoot::new(&file));
        let identity = AccountIdentity::generate("https://x", "k");

        let err = store.open(&identity).unwrap_err();
        assert!(err.is_fatal());
        // A failed open must not leave the account claimed
        assert!(!store.is_open(&identity));
    }

    #[test]
    fn test_unwritable_store_file_is_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let identity = AccountIdentity::generate("https://x", "k");
        // A directory squatting on the scratch path makes every write fail
        std::fs::create_dir(temp_path(&dir.path().join(identity.store_file_name()))).unwrap();

        let err = store.open(&identity).unwrap_err();
        assert!(matches!(err, StoreError::StorageUnavailable { .. }));
        assert!(err.is_fatal());
        assert!(!store.is_open(&identity));
    }
}
