//! Persistence for the connection target.
//!
//! The target survives restarts and reboots as a small JSON file. Loading
//! is best effort: a missing or corrupt file means no target, never a
//! startup failure.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tether_types::{ConnectionTarget, TargetError};
use tracing::warn;
use uuid::Uuid;

/// On-disk form of a connection target.
///
/// The id pair is flattened so that hand-edited files stay readable; the
/// both-or-none rule is re-checked on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedTarget {
    /// Device address or platform identifier.
    pub device_id: String,
    /// Service containing the notification characteristic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<Uuid>,
    /// Characteristic to subscribe to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub characteristic_id: Option<Uuid>,
}

impl PersistedTarget {
    /// Validate into a [`ConnectionTarget`].
    pub fn into_target(self) -> Result<ConnectionTarget, TargetError> {
        ConnectionTarget::from_parts(self.device_id, self.service_id, self.characteristic_id)
    }
}

impl From<&ConnectionTarget> for PersistedTarget {
    fn from(target: &ConnectionTarget) -> Self {
        Self {
            device_id: target.address.clone(),
            service_id: target.subscription.map(|s| s.service),
            characteristic_id: target.subscription.map(|s| s.characteristic),
        }
    }
}

/// Store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to write target file {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to serialize target: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to remove target file {path}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// File-backed store for the persisted target.
#[derive(Debug, Clone)]
pub struct TargetStore {
    path: PathBuf,
}

impl TargetStore {
    /// Create a store at `path`. Nothing is touched until the first save.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted target, if any.
    ///
    /// A missing file is simply `None`. A file that cannot be parsed or
    /// fails validation is logged and treated the same; the daemon must
    /// come up regardless.
    pub fn load(&self) -> Option<ConnectionTarget> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), "Failed to read target file: {e}");
                return None;
            }
        };
        let persisted: PersistedTarget = match serde_json::from_str(&content) {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(path = %self.path.display(), "Ignoring corrupt target file: {e}");
                return None;
            }
        };
        match persisted.into_target() {
            Ok(target) => Some(target),
            Err(e) => {
                warn!(path = %self.path.display(), "Ignoring invalid target file: {e}");
                None
            }
        }
    }

    /// Persist `target`, replacing any previous one.
    pub fn save(&self, target: &ConnectionTarget) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&PersistedTarget::from(target))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Write {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        std::fs::write(&self.path, content).map_err(|e| StoreError::Write {
            path: self.path.clone(),
            source: e,
        })
    }

    /// Remove the persisted target. A missing file is not an error.
    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Remove {
                path: self.path.clone(),
                source: e,
            }),
        }
    }
}

/// Default target file path.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("target.json")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_types::uuids::{NORDIC_UART_SERVICE, NORDIC_UART_TX};

    fn temp_store() -> (tempfile::TempDir, TargetStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TargetStore::new(dir.path().join("target.json"));
        (dir, store)
    }

    #[test]
    fn test_load_missing_file_is_none() {
        let (_dir, store) = temp_store();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let (_dir, store) = temp_store();
        let target = ConnectionTarget::new("AA:BB:CC:DD:EE:FF")
            .unwrap()
            .with_subscription(NORDIC_UART_SERVICE, NORDIC_UART_TX);

        store.save(&target).unwrap();
        assert_eq!(store.load(), Some(target));
    }

    #[test]
    fn test_save_without_subscription() {
        let (_dir, store) = temp_store();
        let target = ConnectionTarget::new("AA:BB").unwrap();

        store.save(&target).unwrap();
        let loaded = store.load().unwrap();
        assert!(loaded.subscription.is_none());

        // The id pair is omitted entirely from the file.
        let content = std::fs::read_to_string(store.path()).unwrap();
        assert!(!content.contains("service_id"));
    }

    #[test]
    fn test_corrupt_file_is_ignored() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_one_sided_pair_is_rejected_on_load() {
        let (_dir, store) = temp_store();
        std::fs::write(
            store.path(),
            format!(r#"{{"device_id":"AA:BB","service_id":"{NORDIC_UART_SERVICE}"}}"#),
        )
        .unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn test_clear_removes_file() {
        let (_dir, store) = temp_store();
        let target = ConnectionTarget::new("AA:BB").unwrap();
        store.save(&target).unwrap();

        store.clear().unwrap();
        assert!(store.load().is_none());

        // Clearing twice is fine.
        store.clear().unwrap();
    }
}
