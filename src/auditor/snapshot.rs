use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use sysinfo::System;

/// Point-in-time view of running processes, used for the best-effort
/// "is this file held open" check. Captured once per session; the clone is
/// cheap and shares the underlying sets.
#[derive(Clone, Default)]
pub struct ProcessSnapshot {
    process_names: Arc<HashSet<String>>,
    command_paths: Arc<HashSet<String>>,
}

impl ProcessSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn capture() -> Self {
        let mut system = System::new();
        system.refresh_processes();

        let mut names = HashSet::new();
        let mut command_paths = HashSet::new();

        for process in system.processes().values() {
            names.insert(process.name().to_lowercase());
            for arg in process.cmd() {
                if arg.contains('/') {
                    command_paths.insert(arg.to_lowercase());
                }
            }
        }

        ProcessSnapshot {
            process_names: Arc::new(names),
            command_paths: Arc::new(command_paths),
        }
    }

    pub fn has_process_named(&self, name: &str) -> bool {
        self.process_names.contains(&name.to_lowercase())
    }

    /// True when some process command line references the path.
    pub fn holds_path(&self, path: &Path) -> bool {
        if self.command_paths.is_empty() {
            return false;
        }
        let needle = path.to_string_lossy().to_lowercase();
        self.command_paths.iter().any(|cmd| cmd.contains(&needle))
    }
}
