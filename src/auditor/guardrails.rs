use std::path::{Path, PathBuf};

/// Absolute prefixes that are never touched, regardless of configuration.
/// Operating-system roots, system libraries, launch daemons, keychains.
const SYSTEM_PREFIXES: &[&str] = &[
    "/System",
    "/System/Library",
    "/System/Applications",
    "/Library/Apple",
    "/Library/Keychains",
    "/Library/LaunchAgents",
    "/Library/LaunchDaemons",
    "/Library/Preferences",
    "/Library/Frameworks",
    "/Library/Extensions",
    "/Library/StagedExtensions",
    "/Library/SystemExtensions",
    "/Library/PrivilegedHelperTools",
    "/Library/Security",
    "/usr",
    "/usr/bin",
    "/usr/sbin",
    "/usr/lib",
    "/usr/libexec",
    "/usr/share",
    "/usr/standalone",
    "/bin",
    "/sbin",
    "/etc",
    "/lib",
    "/lib64",
    "/dev",
    "/proc",
    "/sys",
    "/boot",
    "/run",
    "/private/etc",
    "/private/var",
    "/var/db",
    "/var/root",
    "/cores",
    "/Network",
];

/// Prefixes protected relative to the user's home: credential stores,
/// account databases, preference roots, device backups.
const HOME_RELATIVE_PREFIXES: &[&str] = &[
    "Library/Keychains",
    "Library/Preferences",
    "Library/Accounts",
    "Library/Cookies",
    "Library/Mail",
    "Library/Messages",
    "Library/Safari",
    "Library/Application Support/MobileSync",
    ".ssh",
    ".gnupg",
];

/// The configured deny-list of critical path prefixes. A path equal to or
/// below any entry blocks deletion unconditionally.
pub struct Guardrails {
    home: PathBuf,
    prefixes: Vec<PathBuf>,
}

impl Guardrails {
    pub fn for_home(home: &Path) -> Self {
        let mut prefixes: Vec<PathBuf> =
            SYSTEM_PREFIXES.iter().map(|prefix| PathBuf::from(*prefix)).collect();
        prefixes.extend(HOME_RELATIVE_PREFIXES.iter().map(|rel| home.join(rel)));
        Guardrails {
            home: home.to_path_buf(),
            prefixes,
        }
    }

    /// Returns the violated prefix when the normalized path is equal to or
    /// a descendant of a guarded prefix, or an ancestor of the home
    /// directory (everything above home is off-limits).
    pub fn matched(&self, normalized: &Path) -> Option<String> {
        if self.home.starts_with(normalized) {
            return Some(normalized.display().to_string());
        }
        self.prefixes
            .iter()
            .find(|prefix| normalized.starts_with(prefix))
            .map(|prefix| prefix.display().to_string())
    }

    pub fn len(&self) -> usize {
        self.prefixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }
}
