use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Error taxonomy for every public engine operation.
///
/// Per-item failures (permission denied on a single file, an I/O error while
/// hashing) are folded into aggregate results and never surface here; the
/// variants below are session-scoped and abort the enclosing operation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid options or a missing scan root. Fatal, surfaced immediately.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Permission denied on a resource the engine cannot work without
    /// (e.g. the audit log). Per-file denials are skipped, not raised.
    #[error("permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Attempted operation on a guarded critical path. Never recovered.
    #[error("guardrail violation at {path}: {reason}")]
    GuardrailViolation { path: PathBuf, reason: String },

    /// Backup provider error. Aborts the transaction before any deletion.
    #[error("backup provider failed: {0}")]
    BackupFailed(String),

    /// Mid-clean failure triggered a rollback; the lists enumerate which
    /// paths were restored and which could not be.
    #[error("transaction aborted: {} restored, {} residual", restored.len(), residual.len())]
    TransactionAborted {
        restored: Vec<PathBuf>,
        residual: Vec<PathBuf>,
    },

    /// Cooperative cancellation; partial results were returned to the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// Audit log chain mismatch or index cache corruption. The affected
    /// store is rebuilt; the filesystem itself is untouched.
    #[error("integrity failure: {0}")]
    Integrity(String),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            EngineError::PermissionDenied { path }
        } else {
            EngineError::Io { path, source }
        }
    }

    /// True for errors that invalidate the whole session rather than a
    /// single item or subtree.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EngineError::Io { .. } | EngineError::PermissionDenied { .. }
        )
    }
}
