//! Session coordinator: owns the per-session aggregates and wires the
//! pipeline together (scan, score, group, recommend, clean). All shared
//! stores (audit log, index cache, backup provider) are explicit handles
//! injected here; there are no ambient singletons.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audit_log::{AuditLog, AuditLogHandle, AuditOperation, AuditRecord};
use crate::auditor::SecurityAuditor;
use crate::backup::BackupProvider;
use crate::config::EngineConfig;
use crate::detector::SmartDetector;
use crate::error::Result;
use crate::executor::{CleanExecutor, CleanOptions};
use crate::index::IndexCache;
use crate::recommend;
use crate::scanner::{RawEntry, Scanner};
use crate::types::{
    CleanResult, CleanableItem, ItemId, Recommendation, RiskLevel, ScanResults, SAFE_THRESHOLD,
};

/// Progress observer: fraction complete plus a stage label.
pub type Progress = Arc<dyn Fn(f32, &str) + Send + Sync>;

pub struct CleanupSession {
    config: EngineConfig,
    home: PathBuf,
    session_id: String,
    auditor: Arc<SecurityAuditor>,
    detector: Arc<SmartDetector>,
    index: Arc<IndexCache>,
    audit_log: AuditLogHandle,
    provider: Option<Arc<dyn BackupProvider>>,
}

impl CleanupSession {
    /// Validate the configuration and open the shared stores. The audit
    /// log is opened once with an exclusive append handle; the index is
    /// advisory and loads cold without complaint.
    pub fn new(
        config: EngineConfig,
        audit_log_path: PathBuf,
        index_path: Option<PathBuf>,
    ) -> Result<Self> {
        let home = config.resolve_home()?;
        config.validate(&home)?;

        let audit_log = AuditLog::open_shared(audit_log_path)?;
        let index = Arc::new(match index_path {
            Some(path) => IndexCache::load(path),
            None => IndexCache::in_memory(),
        });
        let auditor = Arc::new(
            SecurityAuditor::new(&home, &config.scan_roots, config.max_file_size_warn)
                .with_full_checks(config.enable_security_audit),
        );
        let detector = Arc::new(SmartDetector::new(&home));

        Ok(CleanupSession {
            config,
            home,
            session_id: Uuid::new_v4().to_string(),
            auditor,
            detector,
            index,
            audit_log,
            provider: None,
        })
    }

    pub fn with_provider(mut self, provider: Arc<dyn BackupProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn audit_log(&self) -> AuditLogHandle {
        self.audit_log.clone()
    }

    /// Run the full scan pipeline: enumerate, audit, score, and group
    /// duplicates. Returns partial results with `cancelled=true` when the
    /// token fires mid-scan.
    pub async fn scan(
        &self,
        cancel: &CancellationToken,
        progress: Option<Progress>,
    ) -> Result<ScanResults> {
        self.append(
            AuditRecord::new(AuditOperation::ScanStarted, self.config.categories_label())
                .with_session(&self.session_id),
        )?;

        let scanner = Scanner::new(self.config.clone(), self.home.clone());
        let categories = self.config.categories.clone();
        let index = self.index.clone();
        let detector = self.detector.clone();
        let auditor = self.auditor.clone();
        let token = cancel.clone();
        let session_id = self.session_id.clone();

        // Enumeration, verdicts, and scoring are blocking/CPU-bound; keep
        // them off the async workers.
        let (items, elevated, file_meta) = tokio::task::spawn_blocking(move || {
            let raw = scanner.scan_raw(
                &categories,
                Some(index.as_ref()),
                &token,
                progress.as_deref(),
            )?;

            let file_meta: std::collections::HashMap<PathBuf, (i64, u64)> = raw
                .iter()
                .map(|entry| (entry.path.clone(), (entry.mtime_ns, entry.inode)))
                .collect();

            let items: Vec<CleanableItem> = raw.into_iter().map(into_item).collect();
            let paths: Vec<PathBuf> = items.iter().map(|i| i.path.clone()).collect();
            let verdicts = auditor.batch_audit(&paths);

            let mut elevated: Vec<(PathBuf, RiskLevel, String)> = Vec::new();
            let items: Vec<CleanableItem> = items
                .into_iter()
                .zip(verdicts)
                .map(|(item, verdict)| {
                    if verdict.risk > RiskLevel::Medium {
                        elevated.push((item.path.clone(), verdict.risk, verdict.reason.clone()));
                    }
                    detector.enhance(item, Some(&verdict))
                })
                .collect();

            Ok::<_, crate::error::EngineError>((items, elevated, file_meta))
        })
        .await
        .map_err(|e| crate::error::EngineError::Integrity(format!("scan task failed: {e}")))??;

        for (path, risk, reason) in elevated {
            self.append(
                AuditRecord::new(AuditOperation::Verdict, format!("{risk:?}: {reason}"))
                    .with_session(&self.session_id)
                    .with_path(path),
            )?;
        }

        // Duplicate grouping runs after scoring so fingerprints land on
        // scored items; cancellation mid-hash yields partial results.
        let mut items = items;
        let mut duplicates = Vec::new();
        let mut cancelled = cancel.is_cancelled();
        if !cancelled {
            let mut dup_detector = self
                .detector
                .duplicate_detector(self.config.include_zero_byte_duplicates);
            for item in &items {
                if let Some(fingerprint) = self.index.fingerprint(
                    &item.path,
                    item.size,
                    item.modified.map(datetime_to_ns).unwrap_or(0),
                ) {
                    dup_detector.preload_fingerprint(&item.path, fingerprint);
                }
            }
            match dup_detector.find_duplicates(&items, cancel).await {
                Ok(groups) => {
                    attach_fingerprints(&mut items, &groups);
                    duplicates = groups;
                }
                Err(crate::error::EngineError::Cancelled) => cancelled = true,
                Err(err) => return Err(err),
            }

            // Remember the fingerprints so the next scan can skip hashing
            // unchanged files.
            for item in &items {
                if let Some(fingerprint) = &item.fingerprint {
                    if let Some((mtime_ns, inode)) = file_meta.get(&item.path) {
                        self.index.record_file(
                            &item.path,
                            item.size,
                            *mtime_ns,
                            *inode,
                            &session_id,
                            Some(fingerprint.clone()),
                        );
                    }
                }
            }
        }

        let results = ScanResults::new(self.session_id.clone(), items, duplicates, cancelled);
        self.append(
            AuditRecord::new(
                AuditOperation::ScanCompleted,
                format!(
                    "{} item(s), {} bytes total, {} bytes safe, cancelled={}",
                    results.items.len(),
                    results.total_size,
                    results.safe_total_size,
                    results.cancelled
                ),
            )
            .with_session(&self.session_id),
        )?;

        if let Err(err) = self.index.persist() {
            log::warn!("index cache persist failed: {err}");
        }
        Ok(results)
    }

    /// Bundle scored items into user-reviewable recommendations.
    pub fn recommend(&self, results: &ScanResults) -> Vec<Recommendation> {
        recommend::synthesize(results, &self.auditor)
    }

    /// Delete the given items under the session's executor.
    pub async fn clean(
        &self,
        items: Vec<CleanableItem>,
        options: &CleanOptions,
        cancel: &CancellationToken,
    ) -> Result<CleanResult> {
        let executor = CleanExecutor::new(
            self.auditor.clone(),
            self.audit_log.clone(),
            self.provider.clone(),
            self.home.clone(),
            self.session_id.clone(),
        );
        executor.clean(items, options, cancel).await
    }

    /// Clean options derived from the session configuration. Backups
    /// default to on exactly when a provider is attached; an explicit
    /// configuration value overrides that.
    pub fn clean_options(&self) -> CleanOptions {
        CleanOptions {
            dry_run: self.config.dry_run,
            require_safety_score: if self.config.safe_mode { SAFE_THRESHOLD } else { 0 },
            backup_before_delete: self
                .config
                .backup_before_delete
                .unwrap_or_else(|| self.provider.is_some()),
            concurrency_limit: self.config.max_concurrency,
            confirm_over_bytes: self.config.confirm_over_bytes,
            ..CleanOptions::default()
        }
    }

    /// Scan-then-clean of everything at or above the safe threshold.
    pub async fn auto(
        &self,
        confirmed: bool,
        cancel: &CancellationToken,
    ) -> Result<(ScanResults, CleanResult)> {
        let results = self.scan(cancel, None).await?;
        let safe: Vec<CleanableItem> = results.safe_items().into_iter().cloned().collect();
        let mut options = self.clean_options();
        options.confirmed = confirmed;
        let clean_result = self.clean(safe, &options, cancel).await?;
        Ok((results, clean_result))
    }

    fn append(&self, record: AuditRecord) -> Result<()> {
        let mut log = self
            .audit_log
            .lock()
            .map_err(|_| crate::error::EngineError::Integrity("audit log lock poisoned".into()))?;
        log.append(record)
    }
}

impl EngineConfig {
    fn categories_label(&self) -> String {
        let names: Vec<&str> = self.categories.iter().map(|c| c.as_str()).collect();
        format!("scan categories: {}", names.join(","))
    }
}

fn into_item(entry: RawEntry) -> CleanableItem {
    CleanableItem {
        id: ItemId::new(),
        name: entry
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        category: entry.category,
        size: entry.size,
        modified: entry.modified.map(DateTime::<Utc>::from),
        accessed: entry.accessed.map(DateTime::<Utc>::from),
        safety_score: 0,
        fingerprint: None,
        explanation: None,
        from_cache: entry.from_cache,
        path: entry.path,
    }
}

fn datetime_to_ns(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(0)
}

fn attach_fingerprints(items: &mut [CleanableItem], groups: &[crate::types::DuplicateGroup]) {
    for group in groups {
        for item in items.iter_mut() {
            if item.id == group.primary || group.redundant.contains(&item.id) {
                item.fingerprint = Some(group.fingerprint.clone());
            }
        }
    }
}
