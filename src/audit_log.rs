//! Append-only, chain-hashed audit log.
//!
//! Every safety-relevant event (scan lifecycle, elevated verdicts, deletion
//! attempts and outcomes, backup references, rollbacks) is written as one
//! newline-delimited JSON record. Each record carries the SHA-256 of the
//! previous record (`prev_hash`) and of its own content (`self_hash`), so a
//! mutated or truncated log is detectable after the fact.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

/// `prev_hash` of the first record in a log file.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    ScanStarted,
    ScanCompleted,
    Verdict,
    TransactionOpened,
    BackupStaged,
    DeleteAttempt,
    DeleteOutcome,
    DryRunClean,
    Rollback,
    TransactionClosed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub operation: AuditOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub detail: String,
    pub prev_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_hash: Option<String>,
}

impl AuditRecord {
    pub fn new(operation: AuditOperation, detail: impl Into<String>) -> Self {
        AuditRecord {
            ts: Utc::now(),
            session_id: None,
            transaction_id: None,
            operation,
            path: None,
            detail: detail.into(),
            prev_hash: String::new(),
            self_hash: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// SHA-256 over the record's serialized content, `self_hash` excluded.
    fn content_hash(&self) -> String {
        let mut unsigned = self.clone();
        unsigned.self_hash = None;
        let payload = serde_json::to_vec(&unsigned).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&payload);
        format!("{:x}", hasher.finalize())
    }
}

/// Exclusive append handle over the audit log file.
///
/// Process-wide: open once and share via [`AuditLogHandle`]; the mutex is
/// the append lock.
pub struct AuditLog {
    path: PathBuf,
    last_hash: String,
    entry_count: u64,
    writer: Option<BufWriter<File>>,
}

pub type AuditLogHandle = Arc<Mutex<AuditLog>>;

impl AuditLog {
    /// Open an existing log (recovering the chain tip from the last record)
    /// or start a new one.
    pub fn open_or_create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }

        let (last_hash, entry_count) = if path.exists() {
            Self::read_chain_tip(&path)?
        } else {
            (GENESIS_HASH.to_string(), 0)
        };

        Ok(AuditLog {
            path,
            last_hash,
            entry_count,
            writer: None,
        })
    }

    pub fn open_shared(path: impl Into<PathBuf>) -> Result<AuditLogHandle> {
        Ok(Arc::new(Mutex::new(Self::open_or_create(path)?)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn last_hash(&self) -> &str {
        &self.last_hash
    }

    /// Append a record, linking it into the hash chain.
    pub fn append(&mut self, mut record: AuditRecord) -> Result<()> {
        record.prev_hash = self.last_hash.clone();
        let hash = record.content_hash();
        record.self_hash = Some(hash.clone());

        let line = serde_json::to_string(&record)
            .map_err(|e| EngineError::Integrity(format!("unserializable audit record: {e}")))?;

        if self.writer.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map_err(|e| EngineError::io(&self.path, e))?;
            self.writer = Some(BufWriter::new(file));
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(EngineError::Integrity("audit log writer unavailable".into()));
        };
        writeln!(writer, "{line}").map_err(|e| EngineError::io(&self.path, e))?;
        writer.flush().map_err(|e| EngineError::io(&self.path, e))?;

        self.last_hash = hash;
        self.entry_count += 1;
        Ok(())
    }

    /// Recompute the chain from disk and compare against the in-memory tip.
    /// Detects both mutated records and a truncated tail.
    pub fn verify(&self) -> Result<u64> {
        let (tip, count) = Self::verify_chain(&self.path)?;
        if count != self.entry_count || tip != self.last_hash {
            return Err(EngineError::Integrity(format!(
                "audit log truncated: expected {} records ending at {}, found {}",
                self.entry_count, self.last_hash, count
            )));
        }
        Ok(count)
    }

    /// Walk the log, checking every link and every content hash. Returns
    /// the chain tip and record count.
    pub fn verify_chain(path: &Path) -> Result<(String, u64)> {
        let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let reader = BufReader::new(file);

        let mut expected_prev = GENESIS_HASH.to_string();
        let mut count = 0u64;

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| EngineError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_str(&line).map_err(|e| {
                EngineError::Integrity(format!("audit record {index} unparsable: {e}"))
            })?;
            if record.prev_hash != expected_prev {
                return Err(EngineError::Integrity(format!(
                    "audit chain broken at record {index}: prev_hash mismatch"
                )));
            }
            let recomputed = record.content_hash();
            match record.self_hash.as_deref() {
                Some(stored) if stored == recomputed => {}
                _ => {
                    return Err(EngineError::Integrity(format!(
                        "audit record {index} content hash mismatch"
                    )));
                }
            }
            expected_prev = recomputed;
            count += 1;
        }

        Ok((expected_prev, count))
    }

    fn read_chain_tip(path: &Path) -> Result<(String, u64)> {
        let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let reader = BufReader::new(file);

        let mut last_hash = GENESIS_HASH.to_string();
        let mut count = 0u64;
        for line in reader.lines() {
            let line = line.map_err(|e| EngineError::io(path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_str(&line).map_err(|e| {
                EngineError::Integrity(format!("audit log unreadable while reopening: {e}"))
            })?;
            if let Some(hash) = record.self_hash {
                last_hash = hash;
            }
            count += 1;
        }
        Ok((last_hash, count))
    }
}
