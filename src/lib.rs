mod audit_log;
mod auditor;
mod backup;
mod config;
mod detector;
mod error;
mod executor;
mod index;
mod recommend;
mod scanner;
mod session;
mod types;

pub use audit_log::{AuditLog, AuditLogHandle, AuditOperation, AuditRecord, GENESIS_HASH};
pub use auditor::{Guardrails, ProcessSnapshot, SecurityAuditor};
pub use backup::{BackupHealth, BackupProvider, BackupRef, Manifest, ManifestEntry};
pub use config::{default_concurrency, EngineConfig, GIB};
pub use detector::{
    apply_verdict_cap, hash_file, DuplicateDetector, HeuristicScorer, SafetyScorer, SmartDetector,
};
pub use error::{EngineError, Result};
pub use executor::{CleanExecutor, CleanOptions};
pub use index::{DirSummary, IndexCache, IndexEntry};
pub use recommend::{human_bytes, synthesize};
pub use scanner::{discovery_roots, RawEntry, RootSpec, ScanMode, Scanner, DEVELOPER_DIR_NAMES};
pub use session::{CleanupSession, Progress};
pub use types::{
    AuditVerdict, Category, CleanResult, CleanableItem, DuplicateGroup, ItemId, ItemOutcome,
    ItemResult, Priority, Recommendation, RiskLevel, ScanCategories, ScanResults, SAFE_THRESHOLD,
};
