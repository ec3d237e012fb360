//! Parallel scanner: category-driven enumeration of cleanup candidates.

mod roots;
mod walker;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

pub use roots::{discovery_roots, RootSpec, ScanMode, BUILD_DIR_NAMES, DEVELOPER_DIR_NAMES};
pub use walker::{directory_size, walk, ProgressFn, RawEntry, WalkerConfig};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::index::IndexCache;
use crate::types::ScanCategories;

pub struct Scanner {
    config: EngineConfig,
    home: PathBuf,
}

impl Scanner {
    pub fn new(config: EngineConfig, home: PathBuf) -> Self {
        Scanner { config, home }
    }

    /// Enumerate candidates for the requested categories. Produces raw
    /// entries; scoring and verdicts are layered on by the session.
    pub fn scan_raw(
        &self,
        categories: &ScanCategories,
        index: Option<&IndexCache>,
        cancel: &CancellationToken,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<RawEntry>> {
        for root in &self.config.scan_roots {
            if !root.is_dir() {
                return Err(EngineError::Configuration(format!(
                    "scan root does not exist: {}",
                    root.display()
                )));
            }
        }

        let specs = discovery_roots(categories, &self.home, &self.config);
        let walker_config = WalkerConfig::new(
            self.config.max_concurrency,
            self.config.include_hidden,
            self.config.follow_symlinks,
        );
        let entries = walk(&specs, &walker_config, index, cancel, progress);
        Ok(dedup_entries(entries))
    }

    /// Concurrent glob-lite: files under `root` whose names match
    /// `pattern` (`*` wildcards only).
    pub fn find_files(root: &Path, pattern: &str) -> Vec<PathBuf> {
        let entries: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();

        entries
            .into_par_iter()
            .filter(|path| {
                path.file_name()
                    .map(|name| glob_match(pattern, &name.to_string_lossy()))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Recursive sizes for a set of roots, computed concurrently. Symlinks
    /// are never followed.
    pub fn directory_sizes(roots: &[PathBuf]) -> HashMap<PathBuf, u64> {
        roots
            .par_iter()
            .map(|root| (root.clone(), directory_size(root)))
            .collect()
    }
}

/// Collapse overlapping discovery roots: one entry per path, and files
/// already covered by an emitted directory item are dropped.
fn dedup_entries(mut entries: Vec<RawEntry>) -> Vec<RawEntry> {
    entries.sort_by(|a, b| a.path.cmp(&b.path).then(a.category.cmp(&b.category)));
    entries.dedup_by(|a, b| a.path == b.path);

    let dir_items: Vec<PathBuf> = entries
        .iter()
        .filter(|e| e.path.is_dir())
        .map(|e| e.path.clone())
        .collect();
    if dir_items.is_empty() {
        return entries;
    }
    entries
        .into_iter()
        .filter(|entry| {
            dir_items
                .iter()
                .all(|dir| entry.path == *dir || !entry.path.starts_with(dir))
        })
        .collect()
}

/// Minimal `*` wildcard matching, case-insensitive.
fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let name = name.to_lowercase();
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let mut rest = name.as_str();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(part) {
                Some(stripped) => rest = stripped,
                None => return false,
            }
        } else if i == parts.len() - 1 {
            return rest.ends_with(part);
        } else {
            match rest.find(part) {
                Some(pos) => rest = &rest[pos + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn glob_matching_covers_common_shapes() {
        assert!(glob_match("*.log", "system.log"));
        assert!(glob_match("*.log", "SYSTEM.LOG"));
        assert!(!glob_match("*.log", "system.txt"));
        assert!(glob_match("cache-*", "cache-0001"));
        assert!(glob_match("*cache*", "my-cache-dir"));
        assert!(glob_match("exact.txt", "exact.txt"));
        assert!(!glob_match("exact.txt", "inexact.txt"));
    }

    #[test]
    fn find_files_matches_patterns_recursively() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.log"), b"x").unwrap();
        fs::write(dir.path().join("sub/b.log"), b"x").unwrap();
        fs::write(dir.path().join("sub/c.txt"), b"x").unwrap();

        let mut found = Scanner::find_files(dir.path(), "*.log");
        found.sort();
        assert_eq!(found.len(), 2);
        assert!(found[0].ends_with("a.log"));
    }

    #[test]
    fn directory_sizes_totals_each_root() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        fs::write(a.join("x"), vec![0u8; 100]).unwrap();
        fs::write(b.join("y"), vec![0u8; 250]).unwrap();

        let sizes = Scanner::directory_sizes(&[a.clone(), b.clone()]);
        assert_eq!(sizes[&a], 100);
        assert_eq!(sizes[&b], 250);
    }

    #[test]
    fn missing_scan_root_aborts_with_configuration_error() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig {
            scan_roots: vec![dir.path().join("gone")],
            ..EngineConfig::default()
        };
        let scanner = Scanner::new(config, dir.path().to_path_buf());
        let result = scanner.scan_raw(
            &ScanCategories::safe(),
            None,
            &CancellationToken::new(),
            None,
        );
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }
}
