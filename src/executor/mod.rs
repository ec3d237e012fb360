//! Clean executor: strict pre-checks, optional pre-deletion backup, and
//! best-effort transactional rollback.

mod journal;
mod trash;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use journal::{JournalStep, StepAction, TransactionJournal};
pub use trash::{move_to_trash, restore_from_trash, trash_dir};

use crate::audit_log::{AuditLogHandle, AuditOperation, AuditRecord};
use crate::auditor::SecurityAuditor;
use crate::backup::{BackupHealth, BackupProvider, Manifest};
use crate::config::{default_concurrency, GIB};
use crate::detector::apply_verdict_cap;
use crate::error::{EngineError, Result};
use crate::types::{CleanResult, CleanableItem, ItemId, ItemOutcome, ItemResult, SAFE_THRESHOLD};

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub dry_run: bool,
    pub require_safety_score: u8,
    pub backup_before_delete: bool,
    pub concurrency_limit: usize,
    /// Refuse without `confirmed` once the requested bytes exceed this.
    pub confirm_over_bytes: u64,
    pub confirmed: bool,
    /// Roll back everything already deleted when any step fails.
    pub atomic: bool,
    /// On cancellation, keep what was already deleted instead of rolling
    /// back.
    pub allow_partial_commit: bool,
}

impl Default for CleanOptions {
    fn default() -> Self {
        CleanOptions {
            dry_run: false,
            require_safety_score: SAFE_THRESHOLD,
            backup_before_delete: false,
            concurrency_limit: default_concurrency(),
            confirm_over_bytes: GIB,
            confirmed: false,
            atomic: true,
            allow_partial_commit: false,
        }
    }
}

pub struct CleanExecutor {
    auditor: Arc<SecurityAuditor>,
    audit_log: AuditLogHandle,
    provider: Option<Arc<dyn BackupProvider>>,
    home: PathBuf,
    session_id: String,
}

impl CleanExecutor {
    pub fn new(
        auditor: Arc<SecurityAuditor>,
        audit_log: AuditLogHandle,
        provider: Option<Arc<dyn BackupProvider>>,
        home: PathBuf,
        session_id: String,
    ) -> Self {
        CleanExecutor {
            auditor,
            audit_log,
            provider,
            home,
            session_id,
        }
    }

    /// Delete the given items under the requested options. Per-item
    /// failures are folded into the result; only session-scoped problems
    /// (confirmation, backup, audit log) surface as errors.
    pub async fn clean(
        &self,
        items: Vec<CleanableItem>,
        options: &CleanOptions,
        cancel: &CancellationToken,
    ) -> Result<CleanResult> {
        let transaction_id = Uuid::new_v4().to_string();

        let requested: u64 = items.iter().map(|i| i.size).sum();
        if !options.dry_run && requested > options.confirm_over_bytes && !options.confirmed {
            return Err(EngineError::Configuration(format!(
                "refusing to delete {requested} bytes without explicit confirmation \
                 (threshold {} bytes)",
                options.confirm_over_bytes
            )));
        }

        // Pre-flight: verdicts can change between scan and clean, so every
        // item is re-audited and its score re-capped before anything moves.
        let mut outcomes: Vec<ItemResult> = Vec::new();
        let mut eligible: Vec<CleanableItem> = Vec::new();
        for item in items {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            // A concurrent clean may have won the race; that is not a
            // failure.
            if !item.path.exists() && !item.path.is_symlink() {
                outcomes.push(ItemResult {
                    id: item.id,
                    path: item.path.clone(),
                    outcome: ItemOutcome::AlreadyGone,
                    error: None,
                });
                continue;
            }
            let verdict = self.auditor.audit(&item.path);
            // A guardrail match means the caller asked for a critical path
            // outright; that aborts the whole operation, loudly.
            if !verdict.violated_guardrails.is_empty() && !options.dry_run {
                self.try_append(
                    AuditRecord::new(
                        AuditOperation::Verdict,
                        format!("guardrail violation: {}", verdict.reason),
                    )
                    .with_session(&self.session_id)
                    .with_transaction(&transaction_id)
                    .with_path(&item.path),
                )?;
                return Err(EngineError::GuardrailViolation {
                    path: item.path.clone(),
                    reason: verdict.reason,
                });
            }
            let capped = apply_verdict_cap(item.safety_score, verdict.risk);
            if verdict.blocks_deletion || capped < options.require_safety_score {
                outcomes.push(ItemResult {
                    id: item.id,
                    path: item.path.clone(),
                    outcome: ItemOutcome::SkippedUnsafe,
                    error: Some(verdict.reason),
                });
            } else {
                eligible.push(item);
            }
        }

        if eligible.is_empty() {
            return Ok(CleanResult {
                transaction_id,
                outcomes,
                reclaimed_bytes: 0,
                dry_run: options.dry_run,
                backup_ref: None,
                aborted: false,
            });
        }

        // Backup acknowledgement happens-before the first deletion it
        // covers; provider failure aborts before anything is touched.
        let mut backup_ref: Option<String> = None;
        if options.backup_before_delete && !options.dry_run {
            let provider = self.provider.clone().ok_or_else(|| {
                EngineError::BackupFailed("backup requested but no provider is configured".into())
            })?;
            let manifest = Manifest::for_items(&transaction_id, &eligible);
            let staged = tokio::task::spawn_blocking(move || provider.stage(&manifest))
                .await
                .map_err(|e| EngineError::BackupFailed(format!("backup task failed: {e}")))?;
            match staged {
                Ok(reference) => {
                    self.try_append(
                        AuditRecord::new(AuditOperation::BackupStaged, reference.clone())
                            .with_session(&self.session_id)
                            .with_transaction(&transaction_id),
                    )?;
                    backup_ref = Some(reference);
                }
                Err(err) => {
                    self.try_append(
                        AuditRecord::new(
                            AuditOperation::BackupStaged,
                            format!("failed: {err}"),
                        )
                        .with_session(&self.session_id)
                        .with_transaction(&transaction_id),
                    )?;
                    return Err(EngineError::BackupFailed(err.to_string()));
                }
            }
        }

        // Dry run: tally bytes, write audit entries, mutate nothing.
        if options.dry_run {
            let mut reclaimed = 0u64;
            for item in &eligible {
                reclaimed += item.size;
                self.try_append(
                    AuditRecord::new(
                        AuditOperation::DryRunClean,
                        format!("would delete {} bytes", item.size),
                    )
                    .with_session(&self.session_id)
                    .with_transaction(&transaction_id)
                    .with_path(&item.path),
                )?;
                outcomes.push(ItemResult {
                    id: item.id,
                    path: item.path.clone(),
                    outcome: ItemOutcome::Deleted,
                    error: None,
                });
            }
            return Ok(CleanResult {
                transaction_id,
                outcomes,
                reclaimed_bytes: reclaimed,
                dry_run: true,
                backup_ref,
                aborted: false,
            });
        }

        self.try_append(
            AuditRecord::new(
                AuditOperation::TransactionOpened,
                format!("{} item(s), {} bytes requested", eligible.len(), requested),
            )
            .with_session(&self.session_id)
            .with_transaction(&transaction_id),
        )?;

        let sizes: HashMap<ItemId, u64> = eligible.iter().map(|i| (i.id, i.size)).collect();

        // Items sharing a parent directory are serialized in lexical order;
        // distinct parents run concurrently up to the limit.
        let mut groups: HashMap<PathBuf, Vec<CleanableItem>> = HashMap::new();
        for item in eligible {
            let parent = item
                .path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/"));
            groups.entry(parent).or_default().push(item);
        }
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.path.cmp(&b.path));
        }

        let journal = Arc::new(TransactionJournal::new(&transaction_id));
        let semaphore = Arc::new(Semaphore::new(options.concurrency_limit.max(1)));
        let failed = Arc::new(AtomicBool::new(false));
        let collected: Arc<Mutex<Vec<ItemResult>>> = Arc::new(Mutex::new(Vec::new()));
        let trash = trash_dir(&self.home);

        let mut handles = Vec::new();
        for (_, group) in groups {
            let journal = journal.clone();
            let semaphore = semaphore.clone();
            let failed = failed.clone();
            let collected = collected.clone();
            let cancel = cancel.clone();
            let audit_log = self.audit_log.clone();
            let trash = trash.clone();
            let backup_ref = backup_ref.clone();
            let session_id = self.session_id.clone();
            let transaction_id = transaction_id.clone();
            let atomic = options.atomic;
            let allow_partial = options.allow_partial_commit;

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                for item in group {
                    if atomic && failed.load(Ordering::SeqCst) {
                        break;
                    }
                    if cancel.is_cancelled() {
                        if !allow_partial {
                            failed.store(true, Ordering::SeqCst);
                        }
                        break;
                    }

                    append_best_effort(
                        &audit_log,
                        AuditRecord::new(AuditOperation::DeleteAttempt, "attempting removal")
                            .with_session(&session_id)
                            .with_transaction(&transaction_id)
                            .with_path(&item.path),
                    );

                    let (outcome, error) = delete_entry(
                        &item,
                        &trash,
                        backup_ref.as_deref(),
                        journal.as_ref(),
                    );
                    if outcome == ItemOutcome::Failed && atomic {
                        failed.store(true, Ordering::SeqCst);
                    }

                    append_best_effort(
                        &audit_log,
                        AuditRecord::new(
                            AuditOperation::DeleteOutcome,
                            outcome_label(outcome, error.as_deref()),
                        )
                        .with_session(&session_id)
                        .with_transaction(&transaction_id)
                        .with_path(&item.path),
                    );

                    if let Ok(mut results) = collected.lock() {
                        results.push(ItemResult {
                            id: item.id,
                            path: item.path.clone(),
                            outcome,
                            error,
                        });
                    }
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }

        let mut attempted = collected
            .lock()
            .map(|results| results.clone())
            .unwrap_or_default();

        let aborted = failed.load(Ordering::SeqCst);
        if aborted && options.atomic {
            self.roll_back(&transaction_id, journal.as_ref(), &mut attempted)
                .await;
        }

        let reclaimed_bytes = attempted
            .iter()
            .filter(|r| r.outcome == ItemOutcome::Deleted)
            .filter_map(|r| sizes.get(&r.id))
            .sum();
        outcomes.extend(attempted);

        self.try_append(
            AuditRecord::new(
                AuditOperation::TransactionClosed,
                if aborted { "aborted" } else { "committed" },
            )
            .with_session(&self.session_id)
            .with_transaction(&transaction_id),
        )?;

        Ok(CleanResult {
            transaction_id,
            outcomes,
            reclaimed_bytes,
            dry_run: false,
            backup_ref,
            aborted,
        })
    }

    /// Undo journaled steps in reverse order: trash moves are renamed
    /// back, unlinked files are re-materialized from the backup when one
    /// exists. Residuals are surfaced as `RolledBackPartial`.
    async fn roll_back(
        &self,
        transaction_id: &str,
        journal: &TransactionJournal,
        attempted: &mut [ItemResult],
    ) {
        for step in journal.steps_for_rollback() {
            let restored = match &step.action {
                StepAction::TrashMoved { trashed_to } => {
                    restore_from_trash(trashed_to, &step.path).is_ok()
                }
                StepAction::Unlinked { backup_ref } => {
                    match (backup_ref, &self.provider) {
                        (Some(reference), Some(provider)) => {
                            let provider = provider.clone();
                            let reference = reference.clone();
                            let path = step.path.clone();
                            let bytes = tokio::task::spawn_blocking(move || {
                                match provider.verify(&reference)? {
                                    BackupHealth::Ok => provider.retrieve(&reference, &path),
                                    health => Err(EngineError::BackupFailed(format!(
                                        "backup {reference} is {health:?}"
                                    ))),
                                }
                            })
                            .await;
                            match bytes {
                                Ok(Ok(bytes)) => std::fs::write(&step.path, bytes).is_ok(),
                                _ => false,
                            }
                        }
                        _ => false,
                    }
                }
            };

            append_best_effort(
                &self.audit_log,
                AuditRecord::new(
                    AuditOperation::Rollback,
                    if restored { "restored" } else { "residual" },
                )
                .with_session(&self.session_id)
                .with_transaction(transaction_id)
                .with_path(&step.path),
            );

            if let Some(result) = attempted.iter_mut().find(|r| r.id == step.item) {
                result.outcome = if restored {
                    ItemOutcome::RolledBack
                } else {
                    ItemOutcome::RolledBackPartial
                };
            }
        }
    }

    fn try_append(&self, record: AuditRecord) -> Result<()> {
        let mut log = self
            .audit_log
            .lock()
            .map_err(|_| EngineError::Integrity("audit log lock poisoned".into()))?;
        log.append(record)
    }
}

fn append_best_effort(audit_log: &AuditLogHandle, record: AuditRecord) {
    match audit_log.lock() {
        Ok(mut log) => {
            if let Err(err) = log.append(record) {
                log::warn!("audit append failed: {err}");
            }
        }
        Err(_) => log::warn!("audit log lock poisoned; record dropped"),
    }
}

fn outcome_label(outcome: ItemOutcome, error: Option<&str>) -> String {
    match error {
        Some(error) => format!("{outcome:?}: {error}"),
        None => format!("{outcome:?}"),
    }
}

/// Attempt one deletion, preferring the reversible trash move and falling
/// back to a direct unlink. Returns the terminal outcome.
fn delete_entry(
    item: &CleanableItem,
    trash: &Path,
    backup_ref: Option<&str>,
    journal: &TransactionJournal,
) -> (ItemOutcome, Option<String>) {
    if let Some(err) = injected_failure(&item.path) {
        return (ItemOutcome::Failed, Some(err.to_string()));
    }
    if !item.path.exists() && !item.path.is_symlink() {
        return (ItemOutcome::AlreadyGone, None);
    }

    match move_to_trash(&item.path, trash) {
        Ok(trashed_to) => {
            journal.record(item.id, item.path.clone(), StepAction::TrashMoved { trashed_to });
            (ItemOutcome::Deleted, None)
        }
        Err(trash_err) => {
            let direct = if item.path.is_dir() {
                std::fs::remove_dir_all(&item.path)
            } else {
                std::fs::remove_file(&item.path)
            };
            match direct {
                Ok(()) => {
                    journal.record(
                        item.id,
                        item.path.clone(),
                        StepAction::Unlinked {
                            backup_ref: backup_ref.map(str::to_string),
                        },
                    );
                    (ItemOutcome::Deleted, None)
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    (ItemOutcome::AlreadyGone, None)
                }
                Err(err) if err.kind() == io::ErrorKind::PermissionDenied => (
                    ItemOutcome::SkippedUnsafe,
                    Some(format!("permission denied: {err}")),
                ),
                Err(err) => (
                    ItemOutcome::Failed,
                    Some(format!("trash: {trash_err}; unlink: {err}")),
                ),
            }
        }
    }
}

/// Deletion fault injection for tests, keyed off the environment so the
/// failure path stays reachable without special builds.
fn injected_failure(path: &Path) -> Option<io::Error> {
    let needle = std::env::var("RECLAIMD_FAIL_DELETE").ok()?;
    if !needle.is_empty() && path.to_string_lossy().contains(&needle) {
        Some(io::Error::other("injected delete failure"))
    } else {
        None
    }
}
