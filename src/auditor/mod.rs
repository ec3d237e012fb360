//! Security auditor: pre-operation safety verdicts.
//!
//! `audit` is a total function: every path gets a verdict, worst case
//! `critical` with deletion blocked. The checks run in a fixed order; the
//! first critical rule short-circuits the rest, while non-critical rules
//! aggregate (highest risk wins, reasons concatenated in fire order).

mod context;
mod guardrails;
mod snapshot;

use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::types::{AuditVerdict, RiskLevel};
use context::PathContext;
pub use guardrails::Guardrails;
pub use snapshot::ProcessSnapshot;

/// File extensions that usually mean a user-authored document.
const USER_DOC_EXTENSIONS: &[&str] = &[
    "doc", "docx", "pages", "key", "numbers", "xls", "xlsx", "ppt", "pptx", "pdf", "psd",
    "sketch", "ai", "epub",
];

/// Segments under which the document heuristic does not apply.
const SCRATCH_SEGMENTS: &[&str] = &["cache", "caches", "log", "logs", "tmp", "temp", "trash"];

/// Extensions that mark platform-provided binary components.
const SYSTEM_COMPONENT_EXTENSIONS: &[&str] = &["dylib", "kext", "so", "framework"];

/// Owner uids below this are treated as system accounts.
const SYSTEM_UID_CEILING: u32 = 500;

struct Finding {
    risk: RiskLevel,
    reason: String,
    blocks: bool,
}

impl Finding {
    fn new(risk: RiskLevel, reason: impl Into<String>) -> Self {
        Finding {
            risk,
            reason: reason.into(),
            blocks: false,
        }
    }

    fn blocking(risk: RiskLevel, reason: impl Into<String>) -> Self {
        Finding {
            risk,
            reason: reason.into(),
            blocks: true,
        }
    }
}

pub struct SecurityAuditor {
    guardrails: Guardrails,
    scan_roots: Vec<PathBuf>,
    snapshot: ProcessSnapshot,
    max_file_size_warn: u64,
    euid: u32,
    full_checks: bool,
}

impl SecurityAuditor {
    pub fn new(home: &Path, scan_roots: &[PathBuf], max_file_size_warn: u64) -> Self {
        // Roots are canonicalized once so the escape check compares like
        // with like when a root itself sits behind a symlink.
        let scan_roots = scan_roots
            .iter()
            .map(|root| root.canonicalize().unwrap_or_else(|_| root.clone()))
            .collect();
        SecurityAuditor {
            guardrails: Guardrails::for_home(home),
            scan_roots,
            snapshot: ProcessSnapshot::capture(),
            max_file_size_warn,
            euid: current_euid(),
            full_checks: true,
        }
    }

    /// Reuse an existing process snapshot instead of capturing a new one.
    pub fn with_snapshot(mut self, snapshot: ProcessSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Disable everything except the guardrail checks. The guardrails
    /// themselves cannot be turned off.
    pub fn with_full_checks(mut self, full_checks: bool) -> Self {
        self.full_checks = full_checks;
        self
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    /// Produce a verdict for a path. Never panics, never touches the
    /// filesystem destructively, and is idempotent for unchanged input.
    pub fn audit(&self, path: &Path) -> AuditVerdict {
        let ctx = PathContext::new(path);

        // 1. Guardrail prefix match.
        if let Some(prefix) = self.guardrails.matched(ctx.normalized()) {
            return AuditVerdict::critical("Critical system path", vec![prefix]);
        }

        // 2. Path traversal and symlink escape.
        if !self.scan_roots.is_empty() {
            if let Ok(resolved) = path.canonicalize() {
                let inside = self.scan_roots.iter().any(|root| resolved.starts_with(root));
                if !inside {
                    return AuditVerdict::critical(
                        "Resolved path escapes the scan root",
                        vec![resolved.display().to_string()],
                    );
                }
            }
        }

        if !self.full_checks {
            return AuditVerdict::minimal("security audit disabled by configuration");
        }

        let mut findings: Vec<Finding> = Vec::new();

        // 3. Ownership.
        match ctx.owner_uid() {
            Some(uid) if uid != self.euid && (uid == 0 || uid < SYSTEM_UID_CEILING) => {
                findings.push(Finding::new(
                    RiskLevel::High,
                    "owned by a system account",
                ));
            }
            Some(_) => {}
            None => {
                findings.push(Finding::new(RiskLevel::Medium, "unknown provenance"));
            }
        }

        // 4. Executable and privileged mode bits. System-prefix binaries are
        // already rejected by the guardrails, so anything left is user space.
        if ctx.is_file() {
            if let Some(mode) = ctx.mode() {
                if mode & 0o6000 != 0 || mode & 0o111 != 0 {
                    findings.push(Finding::new(
                        RiskLevel::Medium,
                        "executable or privileged mode bits",
                    ));
                }
            }
        }

        // 5. Active use.
        if self.snapshot.holds_path(ctx.normalized()) {
            findings.push(Finding::blocking(
                RiskLevel::High,
                "held open by a running process",
            ));
        }

        // 6. System-provenance components.
        if let Some(ext) = ctx.extension() {
            if SYSTEM_COMPONENT_EXTENSIONS.contains(&ext.as_str())
                && (ctx.contains_keyword("/library/") || ctx.contains_keyword("/system/"))
            {
                return AuditVerdict::critical(
                    "System-provided component",
                    vec![ctx.normalized().display().to_string()],
                );
            }
        }

        // 7. Size sanity.
        if let Some(size) = ctx.size() {
            if size > self.max_file_size_warn {
                findings.push(Finding::new(
                    RiskLevel::Medium,
                    format!("unusually large file ({size} bytes)"),
                ));
            }
        }

        // 8. Extension and name heuristics.
        if let Some(ext) = ctx.extension() {
            if USER_DOC_EXTENSIONS.contains(&ext.as_str())
                && !ctx.segment_contains_any(SCRATCH_SEGMENTS)
            {
                findings.push(Finding::new(RiskLevel::Medium, "user document heuristic"));
            }
        }

        if findings.is_empty() {
            return AuditVerdict::minimal("no risk indicators");
        }

        let risk = findings
            .iter()
            .map(|f| f.risk)
            .max()
            .unwrap_or(RiskLevel::Minimal);
        let blocks = findings.iter().any(|f| f.blocks);
        let reason = findings
            .iter()
            .map(|f| f.reason.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        AuditVerdict::aggregate(risk, reason, Vec::new(), blocks)
    }

    /// Parallel, order-preserving audit of a batch of paths.
    pub fn batch_audit(&self, paths: &[PathBuf]) -> Vec<AuditVerdict> {
        paths.par_iter().map(|path| self.audit(path)).collect()
    }
}

#[cfg(unix)]
fn current_euid() -> u32 {
    // Safety: geteuid has no failure modes and touches no memory.
    unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
fn current_euid() -> u32 {
    u32::MAX
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn auditor_for(home: &Path, roots: &[PathBuf]) -> SecurityAuditor {
        SecurityAuditor::new(home, roots, 10 * 1024 * 1024 * 1024)
            .with_snapshot(ProcessSnapshot::empty())
    }

    #[test]
    fn guardrail_paths_are_critical_and_blocked() {
        let auditor = auditor_for(Path::new("/home/u"), &[]);
        let verdict = auditor.audit(Path::new("/System/Library/CoreServices"));
        assert_eq!(verdict.risk, RiskLevel::Critical);
        assert!(verdict.blocks_deletion);
        assert_eq!(verdict.reason, "Critical system path");
        assert!(!verdict.violated_guardrails.is_empty());
    }

    #[test]
    fn traversal_above_home_is_critical() {
        let auditor = auditor_for(Path::new("/home/u"), &[]);
        let verdict = auditor.audit(Path::new("/home/u/.cache/../../../etc/passwd"));
        assert_eq!(verdict.risk, RiskLevel::Critical);
    }

    #[test]
    fn symlink_escaping_the_scan_root_is_critical() {
        let root = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("target.txt");
        fs::write(&target, b"outside").unwrap();
        let link = root.path().join("escape");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let auditor = auditor_for(root.path(), &[root.path().to_path_buf()]);
        let verdict = auditor.audit(&link);
        assert_eq!(verdict.risk, RiskLevel::Critical);
        assert!(verdict.blocks_deletion);
    }

    #[test]
    fn cache_file_inside_root_is_minimal() {
        let root = TempDir::new().unwrap();
        let cache = root.path().join(".cache/app");
        fs::create_dir_all(&cache).unwrap();
        let file = cache.join("blob.bin");
        fs::write(&file, vec![0u8; 128]).unwrap();

        let auditor = auditor_for(root.path(), &[root.path().to_path_buf()]);
        let verdict = auditor.audit(&file);
        assert_eq!(verdict.risk, RiskLevel::Minimal);
        assert!(!verdict.blocks_deletion);
    }

    #[test]
    fn user_document_heuristic_raises_to_medium() {
        let root = TempDir::new().unwrap();
        let docs = root.path().join("Documents");
        fs::create_dir_all(&docs).unwrap();
        let file = docs.join("report.pdf");
        fs::write(&file, b"pdf").unwrap();

        let auditor = auditor_for(root.path(), &[root.path().to_path_buf()]);
        let verdict = auditor.audit(&file);
        assert_eq!(verdict.risk, RiskLevel::Medium);
        assert!(verdict.reason.contains("user document heuristic"));
    }

    #[test]
    fn document_heuristic_skips_cache_locations() {
        let root = TempDir::new().unwrap();
        let cache = root.path().join(".cache");
        fs::create_dir_all(&cache).unwrap();
        let file = cache.join("preview.pdf");
        fs::write(&file, b"pdf").unwrap();

        let auditor = auditor_for(root.path(), &[root.path().to_path_buf()]);
        assert_eq!(auditor.audit(&file).risk, RiskLevel::Minimal);
    }

    #[test]
    fn oversized_files_are_flagged_medium() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("big.bin");
        fs::write(&file, vec![0u8; 4096]).unwrap();

        let auditor = SecurityAuditor::new(root.path(), &[root.path().to_path_buf()], 1024)
            .with_snapshot(ProcessSnapshot::empty());
        let verdict = auditor.audit(&file);
        assert_eq!(verdict.risk, RiskLevel::Medium);
        assert!(verdict.reason.contains("unusually large"));
    }

    #[test]
    fn missing_path_yields_unknown_provenance() {
        let root = TempDir::new().unwrap();
        let auditor = auditor_for(root.path(), &[root.path().to_path_buf()]);
        let verdict = auditor.audit(&root.path().join("vanished.tmp"));
        assert_eq!(verdict.risk, RiskLevel::Medium);
        assert!(verdict.reason.contains("unknown provenance"));
    }

    #[test]
    fn audit_is_idempotent() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("x.log");
        fs::write(&file, b"log").unwrap();

        let auditor = auditor_for(root.path(), &[root.path().to_path_buf()]);
        let first = auditor.audit(&file);
        let second = auditor.audit(&file);
        assert_eq!(first.risk, second.risk);
        assert_eq!(first.reason, second.reason);
    }

    #[test]
    fn guardrails_survive_a_disabled_audit() {
        let root = TempDir::new().unwrap();
        let doc = root.path().join("Documents/report.pdf");
        fs::create_dir_all(doc.parent().unwrap()).unwrap();
        fs::write(&doc, b"pdf").unwrap();

        let auditor = auditor_for(root.path(), &[root.path().to_path_buf()])
            .with_full_checks(false);
        // heuristics are off
        assert_eq!(auditor.audit(&doc).risk, RiskLevel::Minimal);
        // the deny list is not
        let verdict = auditor.audit(Path::new("/usr/lib/foo"));
        assert_eq!(verdict.risk, RiskLevel::Critical);
        assert!(verdict.blocks_deletion);
    }

    #[test]
    fn batch_audit_preserves_order() {
        let root = TempDir::new().unwrap();
        let a = root.path().join("a.log");
        fs::write(&a, b"a").unwrap();
        let paths = vec![
            PathBuf::from("/System/Library"),
            a.clone(),
            PathBuf::from("/usr/lib/libc.dylib"),
        ];

        let auditor = auditor_for(root.path(), &[]);
        let verdicts = auditor.batch_audit(&paths);
        assert_eq!(verdicts.len(), 3);
        assert_eq!(verdicts[0].risk, RiskLevel::Critical);
        assert!(verdicts[1].risk < RiskLevel::Critical);
        assert_eq!(verdicts[2].risk, RiskLevel::Critical);
    }
}
