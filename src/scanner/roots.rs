use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::types::{Category, ScanCategories};

/// Directory names treated as developer junk wherever they appear.
/// Externalized so community additions stay a one-line change; callers can
/// extend the set through `EngineConfig::extra_developer_dirs`.
pub const DEVELOPER_DIR_NAMES: &[&str] = &[
    "node_modules",
    ".gradle",
    "__pycache__",
    ".tox",
    ".venv",
    "Pods",
    ".parcel-cache",
    ".turbo",
    ".pytest_cache",
    ".mypy_cache",
    "bower_components",
];

/// Directory names that hold build outputs.
pub const BUILD_DIR_NAMES: &[&str] = &[
    "target",
    "build",
    "dist",
    "out",
    "DerivedData",
    ".next",
    "cmake-build-debug",
    "cmake-build-release",
];

const LARGE_FILE_FLOOR: u64 = 100 * 1024 * 1024;

/// How a discovery root is enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanMode {
    /// Every regular file below the root belongs to the category.
    Files,
    /// Directories whose leaf name matches become items themselves
    /// (sized recursively, never descended into).
    MatchDirNames(Vec<String>),
}

/// One well-known discovery root for a category.
#[derive(Debug, Clone)]
pub struct RootSpec {
    pub root: PathBuf,
    pub category: Category,
    pub mode: ScanMode,
    /// Hidden entries are included under cache/trash roots by default.
    pub include_hidden: bool,
    pub max_depth: usize,
    pub min_size: u64,
}

impl RootSpec {
    fn files(root: PathBuf, category: Category, include_hidden: bool) -> Self {
        RootSpec {
            root,
            category,
            mode: ScanMode::Files,
            include_hidden,
            max_depth: 12,
            min_size: 0,
        }
    }
}

/// Table-driven mapping from categories to discovery roots. The result is
/// restricted to the configured scan roots before walking.
pub fn discovery_roots(
    categories: &ScanCategories,
    home: &Path,
    config: &EngineConfig,
) -> Vec<RootSpec> {
    let mut specs = Vec::new();

    for category in categories.iter() {
        match category {
            // Per-application caches live under the XDG cache home; the
            // user-domain Library caches are the user's own cache domain.
            Category::AppCaches => {
                specs.push(RootSpec::files(home.join(".cache"), category, true));
            }
            Category::UserCaches => {
                specs.push(RootSpec::files(home.join("Library/Caches"), category, true));
            }
            Category::Logs => {
                specs.push(RootSpec::files(home.join("Library/Logs"), category, false));
                specs.push(RootSpec::files(home.join(".local/state"), category, true));
            }
            Category::TemporaryFiles => {
                specs.push(RootSpec::files(std::env::temp_dir(), category, true));
                specs.push(RootSpec::files(
                    home.join("Library/Caches/TemporaryItems"),
                    category,
                    true,
                ));
            }
            Category::Trash => {
                specs.push(RootSpec::files(home.join(".Trash"), category, true));
                specs.push(RootSpec::files(
                    home.join(".local/share/Trash/files"),
                    category,
                    true,
                ));
            }
            Category::DeveloperJunk => {
                let mut names: Vec<String> =
                    DEVELOPER_DIR_NAMES.iter().map(|s| s.to_string()).collect();
                names.extend(config.extra_developer_dirs.iter().cloned());
                for root in &config.scan_roots {
                    specs.push(RootSpec {
                        root: root.clone(),
                        category,
                        mode: ScanMode::MatchDirNames(names.clone()),
                        include_hidden: true,
                        max_depth: 8,
                        min_size: 0,
                    });
                }
                specs.push(RootSpec::files(home.join(".npm/_cacache"), category, true));
                specs.push(RootSpec::files(
                    home.join(".cargo/registry/cache"),
                    category,
                    true,
                ));
                specs.push(RootSpec::files(
                    home.join("Library/Caches/go-build"),
                    category,
                    true,
                ));
            }
            Category::BuildArtifacts => {
                let names: Vec<String> = BUILD_DIR_NAMES.iter().map(|s| s.to_string()).collect();
                for root in &config.scan_roots {
                    specs.push(RootSpec {
                        root: root.clone(),
                        category,
                        mode: ScanMode::MatchDirNames(names.clone()),
                        include_hidden: false,
                        max_depth: 8,
                        min_size: 0,
                    });
                }
                specs.push(RootSpec::files(
                    home.join("Library/Developer/Xcode/DerivedData"),
                    category,
                    true,
                ));
            }
            Category::LargeFiles => {
                for dir in ["Downloads", "Desktop"] {
                    specs.push(RootSpec {
                        root: home.join(dir),
                        category,
                        mode: ScanMode::Files,
                        include_hidden: false,
                        max_depth: 4,
                        min_size: LARGE_FILE_FLOOR,
                    });
                }
            }
            Category::Orphaned => {
                specs.push(RootSpec::files(
                    home.join("Library/Saved Application State"),
                    category,
                    false,
                ));
            }
            // Derived by the duplicate detector, not enumerated directly.
            Category::Duplicates => {}
        }
    }

    restrict_to_scan_roots(specs, &config.scan_roots)
}

/// Keep only roots that intersect the caller-approved scan roots, narrowing
/// each spec to the deeper of the two paths.
fn restrict_to_scan_roots(specs: Vec<RootSpec>, scan_roots: &[PathBuf]) -> Vec<RootSpec> {
    let mut restricted = Vec::new();
    for spec in specs {
        for scan_root in scan_roots {
            if spec.root.starts_with(scan_root) {
                restricted.push(spec.clone());
                break;
            }
            if scan_root.starts_with(&spec.root) {
                let mut narrowed = spec.clone();
                narrowed.root = scan_root.clone();
                restricted.push(narrowed);
                break;
            }
        }
    }
    restricted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_root(root: &Path) -> EngineConfig {
        EngineConfig {
            scan_roots: vec![root.to_path_buf()],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn safe_categories_map_to_home_roots() {
        let home = Path::new("/home/u");
        let config = config_with_root(home);
        let specs = discovery_roots(&ScanCategories::safe(), home, &config);

        assert!(specs
            .iter()
            .any(|s| s.root == home.join(".cache") && s.category == Category::AppCaches));
        assert!(specs
            .iter()
            .any(|s| s.root == home.join("Library/Caches") && s.category == Category::UserCaches));
        assert!(specs
            .iter()
            .any(|s| s.root == home.join(".Trash") && s.category == Category::Trash));
        // no developer roots in the safe set
        assert!(!specs.iter().any(|s| s.category == Category::DeveloperJunk));
    }

    #[test]
    fn developer_filter_uses_dir_name_matching() {
        let home = Path::new("/home/u");
        let mut config = config_with_root(home);
        config.extra_developer_dirs = vec!["zig-cache".to_string()];
        let specs = discovery_roots(&ScanCategories::developer(), home, &config);

        let junk = specs
            .iter()
            .find(|s| s.category == Category::DeveloperJunk && s.root == home)
            .expect("home-wide developer spec");
        match &junk.mode {
            ScanMode::MatchDirNames(names) => {
                assert!(names.iter().any(|n| n == "node_modules"));
                assert!(names.iter().any(|n| n == "zig-cache"));
            }
            other => panic!("unexpected mode: {other:?}"),
        }
    }

    #[test]
    fn roots_outside_scan_roots_are_dropped() {
        let home = Path::new("/home/u");
        let config = EngineConfig {
            scan_roots: vec![home.join(".cache")],
            ..EngineConfig::default()
        };
        let specs = discovery_roots(&ScanCategories::safe(), home, &config);

        assert!(specs.iter().all(|s| s.root.starts_with(home.join(".cache"))));
        // the trash root does not intersect ~/.cache
        assert!(!specs.iter().any(|s| s.category == Category::Trash));
    }

    #[test]
    fn narrower_scan_root_wins() {
        let home = Path::new("/home/u");
        let narrow = home.join(".cache/app");
        let config = EngineConfig {
            scan_roots: vec![narrow.clone()],
            ..EngineConfig::default()
        };
        let specs = discovery_roots(&ScanCategories::safe(), home, &config);
        let cache = specs
            .iter()
            .find(|s| s.category == Category::AppCaches)
            .unwrap();
        assert_eq!(cache.root, narrow);
    }
}
