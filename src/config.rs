// src/config.rs

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::ScanCategories;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Structured configuration for a cleanup session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub dry_run: bool,               // Default: false
    pub safe_mode: bool,             // Default: true (enforces SAFE_THRESHOLD)
    pub enable_security_audit: bool, // Default: true; guardrail paths are audited regardless
    pub max_concurrency: usize,      // Default: min(num_cpus, 8)
    pub follow_symlinks: bool,       // Default: false
    pub include_hidden: bool,        // Default: false
    pub max_file_size_warn: u64, // Default: 10 GiB
    /// Unset means "true when a backup provider is configured"; an explicit
    /// value always wins.
    pub backup_before_delete: Option<bool>,
    pub categories: ScanCategories, // Default: safe
    pub scan_roots: Vec<PathBuf>,
    /// Roots outside the home directory the caller attests are user scratch
    /// locations. Anything else outside home is rejected.
    pub attested_scratch_roots: Vec<PathBuf>,
    /// Whether identical zero-byte files may form duplicate groups.
    pub include_zero_byte_duplicates: bool, // Default: false
    /// Additional directory names treated as developer junk, merged with
    /// the built-in table.
    pub extra_developer_dirs: Vec<String>,
    pub confirm_over_bytes: u64, // Default: 1 GiB
}

impl Default for EngineConfig {
    fn default() -> Self {
        let scan_roots = dirs::home_dir().into_iter().collect();
        EngineConfig {
            dry_run: false,
            safe_mode: true,
            enable_security_audit: true,
            max_concurrency: default_concurrency(),
            follow_symlinks: false,
            include_hidden: false,
            max_file_size_warn: 10 * GIB,
            backup_before_delete: None,
            categories: ScanCategories::safe(),
            scan_roots,
            attested_scratch_roots: Vec::new(),
            include_zero_byte_duplicates: false,
            extra_developer_dirs: Vec::new(),
            confirm_over_bytes: GIB,
        }
    }
}

pub fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, 8)
}

impl EngineConfig {
    /// Validates the configuration against the invoking user's home
    /// directory. Invalid values fail with a specific error.
    pub fn validate(&self, home: &Path) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(EngineError::Configuration(
                "max_concurrency must be at least 1".into(),
            ));
        }
        if self.scan_roots.is_empty() {
            return Err(EngineError::Configuration(
                "at least one scan root is required".into(),
            ));
        }
        if self.categories.is_empty() {
            return Err(EngineError::Configuration(
                "category filter is empty; nothing to scan".into(),
            ));
        }
        for root in &self.scan_roots {
            if !root.is_absolute() {
                return Err(EngineError::Configuration(format!(
                    "scan root must be absolute: {}",
                    root.display()
                )));
            }
            if !root.starts_with(home) && !self.is_attested(root) {
                return Err(EngineError::Configuration(format!(
                    "scan root {} is outside the home directory and was not \
                     attested as a scratch location",
                    root.display()
                )));
            }
            if !root.is_dir() {
                return Err(EngineError::Configuration(format!(
                    "scan root does not exist: {}",
                    root.display()
                )));
            }
        }
        Ok(())
    }

    fn is_attested(&self, root: &Path) -> bool {
        self.attested_scratch_roots
            .iter()
            .any(|attested| root.starts_with(attested))
    }

    /// The home directory the session operates under.
    pub fn resolve_home(&self) -> Result<PathBuf> {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Configuration("could not determine home directory".into()))
    }
}
