//! Advisory index cache for incremental re-scans.
//!
//! Caches per-directory summaries and per-file content fingerprints keyed by
//! `(size, mtime, inode)`. Entries are never authoritative: any mismatch with
//! the live filesystem forces a re-read, and a cold cache only costs time.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

pub const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub size: u64,
    pub mtime_ns: i64,
    pub inode: u64,
    pub last_seen_session: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Fields written by newer versions are preserved across rewrites.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirSummary {
    pub count: usize,
    pub total_size: u64,
    pub dir_mtime_ns: i64,
    /// Names of subdirectories seen during enumeration, so an unchanged
    /// directory can be replayed without re-reading it.
    #[serde(default)]
    pub subdirs: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    dirs: BTreeMap<String, DirSummary>,
    #[serde(default)]
    files: BTreeMap<String, IndexEntry>,
}

/// Single-writer, multi-reader per process; writes are serialized through
/// the session coordinator.
pub struct IndexCache {
    path: Option<PathBuf>,
    dirs: DashMap<PathBuf, DirSummary>,
    files: DashMap<PathBuf, IndexEntry>,
}

impl IndexCache {
    /// An unpersisted cache; useful when the caller opts out of durability.
    pub fn in_memory() -> Self {
        IndexCache {
            path: None,
            dirs: DashMap::new(),
            files: DashMap::new(),
        }
    }

    /// Load the store, rebuilding from empty on a version mismatch or
    /// corrupt file (never a correctness issue, only a cold start).
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = IndexCache {
            path: Some(path.clone()),
            dirs: DashMap::new(),
            files: DashMap::new(),
        };

        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(_) => return cache,
        };
        let store: StoreFile = match serde_json::from_slice(&raw) {
            Ok(store) => store,
            Err(err) => {
                log::warn!("index cache unreadable, rebuilding: {err}");
                return cache;
            }
        };
        if store.version != STORE_VERSION {
            log::warn!(
                "index cache version {} != {}, rebuilding",
                store.version,
                STORE_VERSION
            );
            return cache;
        }

        for (key, summary) in store.dirs {
            cache.dirs.insert(PathBuf::from(key), summary);
        }
        for (key, entry) in store.files {
            cache.files.insert(PathBuf::from(key), entry);
        }
        cache
    }

    pub fn summary(&self, dir: &Path) -> Option<DirSummary> {
        self.dirs.get(dir).map(|s| s.clone())
    }

    pub fn record_summary(&self, dir: &Path, summary: DirSummary) {
        self.dirs.insert(dir.to_path_buf(), summary);
    }

    /// Cached fingerprint for a file, valid only while `(size, mtime)`
    /// still match. A stale entry is dropped on sight.
    pub fn fingerprint(&self, path: &Path, size: u64, mtime_ns: i64) -> Option<String> {
        {
            let entry = self.files.get(path)?;
            if entry.size == size && entry.mtime_ns == mtime_ns {
                return entry.fingerprint.clone();
            }
        }
        self.files.remove(path);
        None
    }

    pub fn entry(&self, path: &Path) -> Option<IndexEntry> {
        self.files.get(path).map(|e| e.clone())
    }

    pub fn record_file(
        &self,
        path: &Path,
        size: u64,
        mtime_ns: i64,
        inode: u64,
        session: &str,
        fingerprint: Option<String>,
    ) {
        let extra = self
            .files
            .get(path)
            .map(|existing| existing.extra.clone())
            .unwrap_or_default();
        self.files.insert(
            path.to_path_buf(),
            IndexEntry {
                size,
                mtime_ns,
                inode,
                last_seen_session: session.to_string(),
                fingerprint,
                extra,
            },
        );
    }

    /// Cached file entries that are immediate children of `dir`, for
    /// replaying an unchanged directory without touching its files.
    pub fn files_under(&self, dir: &Path) -> Vec<(PathBuf, IndexEntry)> {
        self.files
            .iter()
            .filter(|entry| entry.key().parent() == Some(dir))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Drop one directory's summary and its direct file entries, leaving
    /// deeper summaries intact for their own staleness checks.
    pub fn invalidate_dir(&self, dir: &Path) {
        self.dirs.remove(dir);
        self.files.retain(|key, _| key.parent() != Some(dir));
    }

    /// Drop everything at or below `prefix`.
    pub fn invalidate_subtree(&self, prefix: &Path) {
        self.dirs.retain(|key, _| !key.starts_with(prefix));
        self.files.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Durable write with atomic replace: serialize to a sibling temp file,
    /// then rename over the store.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }

        let store = StoreFile {
            version: STORE_VERSION,
            dirs: self
                .dirs
                .iter()
                .map(|e| (e.key().to_string_lossy().into_owned(), e.value().clone()))
                .collect(),
            files: self
                .files
                .iter()
                .map(|e| (e.key().to_string_lossy().into_owned(), e.value().clone()))
                .collect(),
        };
        let payload = serde_json::to_vec(&store)
            .map_err(|e| EngineError::Integrity(format!("index cache serialization: {e}")))?;

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, payload).map_err(|e| EngineError::io(&tmp, e))?;
        std::fs::rename(&tmp, path).map_err(|e| EngineError::io(path, e))?;
        Ok(())
    }
}

/// Modification time as nanoseconds since the epoch.
pub fn mtime_ns(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn stale_fingerprint_is_invalidated() {
        let cache = IndexCache::in_memory();
        let path = Path::new("/home/u/file.bin");
        cache.record_file(path, 100, 42, 7, "s1", Some("abc".into()));

        assert_eq!(cache.fingerprint(path, 100, 42).as_deref(), Some("abc"));
        // size changed: entry is dropped, not served
        assert!(cache.fingerprint(path, 101, 42).is_none());
        assert!(cache.entry(path).is_none());
    }

    #[test]
    fn persist_and_reload_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("index.json");

        let cache = IndexCache::load(&store);
        cache.record_file(Path::new("/home/u/a"), 10, 1, 2, "s1", Some("ff".into()));
        cache.record_summary(
            Path::new("/home/u"),
            DirSummary {
                count: 1,
                total_size: 10,
                dir_mtime_ns: 99,
                subdirs: vec!["sub".into()],
            },
        );
        cache.persist().unwrap();

        let reloaded = IndexCache::load(&store);
        assert_eq!(reloaded.file_count(), 1);
        assert_eq!(
            reloaded.fingerprint(Path::new("/home/u/a"), 10, 1).as_deref(),
            Some("ff")
        );
        assert_eq!(reloaded.summary(Path::new("/home/u")).unwrap().count, 1);
    }

    #[test]
    fn version_mismatch_rebuilds_empty() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("index.json");
        std::fs::write(&store, r#"{"version": 999, "dirs": {}, "files": {}}"#).unwrap();

        let cache = IndexCache::load(&store);
        assert_eq!(cache.file_count(), 0);
        assert_eq!(cache.dir_count(), 0);
    }

    #[test]
    fn unknown_fields_survive_a_rewrite() {
        let dir = TempDir::new().unwrap();
        let store = dir.path().join("index.json");
        std::fs::write(
            &store,
            format!(
                r#"{{"version": {STORE_VERSION}, "files": {{"/home/u/a": {{"size": 5, "mtime_ns": 1, "inode": 2, "last_seen_session": "old", "future_field": true}}}}}}"#
            ),
        )
        .unwrap();

        let cache = IndexCache::load(&store);
        cache.record_file(Path::new("/home/u/a"), 5, 1, 2, "new", None);
        cache.persist().unwrap();

        let raw = std::fs::read_to_string(&store).unwrap();
        assert!(raw.contains("future_field"));
    }

    #[test]
    fn invalidate_subtree_drops_descendants() {
        let cache = IndexCache::in_memory();
        cache.record_file(Path::new("/home/u/proj/a"), 1, 1, 1, "s", None);
        cache.record_file(Path::new("/home/u/other/b"), 1, 1, 1, "s", None);
        cache.record_summary(
            Path::new("/home/u/proj"),
            DirSummary {
                count: 1,
                total_size: 1,
                dir_mtime_ns: 1,
                subdirs: Vec::new(),
            },
        );

        cache.invalidate_subtree(Path::new("/home/u/proj"));
        assert!(cache.entry(Path::new("/home/u/proj/a")).is_none());
        assert!(cache.entry(Path::new("/home/u/other/b")).is_some());
        assert!(cache.summary(Path::new("/home/u/proj")).is_none());
    }

    #[test]
    fn files_under_returns_direct_children_only() {
        let cache = IndexCache::in_memory();
        cache.record_file(Path::new("/home/u/d/a"), 1, 1, 1, "s", None);
        cache.record_file(Path::new("/home/u/d/sub/b"), 1, 1, 1, "s", None);

        let children = cache.files_under(Path::new("/home/u/d"));
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].0, Path::new("/home/u/d/a"));
    }
}
