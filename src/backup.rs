//! Backup provider interface, consumed by the clean executor.
//!
//! Providers live outside the engine (cloud targets, NAS, archives); the
//! executor only needs the narrow stage/verify/retrieve capability. Any
//! non-ok answer is fatal to the enclosing transaction.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::CleanableItem;

/// Opaque reference returned by a provider for one staged backup.
pub type BackupRef = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupHealth {
    Ok,
    Missing,
    Corrupt,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub path: PathBuf,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// What the provider is asked to preserve before deletion starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub transaction_id: String,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn for_items(transaction_id: &str, items: &[CleanableItem]) -> Self {
        Manifest {
            transaction_id: transaction_id.to_string(),
            entries: items
                .iter()
                .map(|item| ManifestEntry {
                    path: item.path.clone(),
                    size: item.size,
                    fingerprint: item.fingerprint.clone(),
                })
                .collect(),
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Capability set every backup target implements. Methods are blocking;
/// the executor calls them off the async path.
pub trait BackupProvider: Send + Sync {
    fn stage(&self, manifest: &Manifest) -> Result<BackupRef>;

    fn verify(&self, backup: &BackupRef) -> Result<BackupHealth>;

    fn retrieve(&self, backup: &BackupRef, path: &Path) -> Result<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, ItemId};

    #[test]
    fn manifest_captures_paths_sizes_and_fingerprints() {
        let items = vec![CleanableItem {
            id: ItemId::new(),
            path: PathBuf::from("/home/u/.cache/a"),
            name: "a".into(),
            category: Category::UserCaches,
            size: 42,
            modified: None,
            accessed: None,
            safety_score: 80,
            fingerprint: Some("aa".repeat(32)),
            explanation: None,
            from_cache: false,
        }];
        let manifest = Manifest::for_items("tx-1", &items);
        assert_eq!(manifest.transaction_id, "tx-1");
        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(manifest.total_bytes(), 42);
        assert!(manifest.entries[0].fingerprint.is_some());
    }
}
