use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use reclaimd::{
    AuditLog, BackupHealth, BackupProvider, BackupRef, Category, CleanOptions, CleanableItem,
    CleanupSession, EngineConfig, EngineError, ItemId, ItemOutcome, Manifest,
};

static TEST_ENV_GUARD: Mutex<()> = Mutex::new(());

struct SandboxHome {
    home: TempDir,
    prev_home: Option<String>,
    prev_tmpdir: Option<String>,
}

impl SandboxHome {
    fn new() -> Self {
        let home = TempDir::new().expect("temp home dir");
        let prev_home = std::env::var("HOME").ok();
        std::env::set_var("HOME", home.path());
        // Keep the temp-file discovery root inside the sandbox.
        let prev_tmpdir = std::env::var("TMPDIR").ok();
        fs::create_dir_all(home.path().join(".tmp")).expect("create tmp");
        std::env::set_var("TMPDIR", home.path().join(".tmp"));
        SandboxHome {
            home,
            prev_home,
            prev_tmpdir,
        }
    }

    fn path(&self) -> &Path {
        self.home.path()
    }

    fn audit_path(&self) -> PathBuf {
        self.path().join(".state/audit.ndjson")
    }

    fn create_file(&self, relative: &str, size: usize) -> PathBuf {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent");
        }
        fs::write(&path, vec![0u8; size]).expect("write file");
        path
    }

    fn session(&self) -> CleanupSession {
        let config = EngineConfig {
            scan_roots: vec![self.path().to_path_buf()],
            ..EngineConfig::default()
        };
        CleanupSession::new(config, self.audit_path(), None).expect("session should open")
    }
}

impl Drop for SandboxHome {
    fn drop(&mut self) {
        std::env::remove_var("RECLAIMD_FAIL_DELETE");
        if let Some(prev) = self.prev_home.take() {
            std::env::set_var("HOME", prev);
        } else {
            std::env::remove_var("HOME");
        }
        if let Some(prev) = self.prev_tmpdir.take() {
            std::env::set_var("TMPDIR", prev);
        } else {
            std::env::remove_var("TMPDIR");
        }
    }
}

fn acquire_env_guard() -> MutexGuard<'static, ()> {
    TEST_ENV_GUARD
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct HealthyProvider;

impl BackupProvider for HealthyProvider {
    fn stage(&self, manifest: &Manifest) -> reclaimd::Result<BackupRef> {
        assert!(!manifest.entries.is_empty());
        Ok("B".to_string())
    }

    fn verify(&self, _backup: &BackupRef) -> reclaimd::Result<BackupHealth> {
        Ok(BackupHealth::Ok)
    }

    fn retrieve(&self, _backup: &BackupRef, _path: &Path) -> reclaimd::Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

struct OfflineProvider;

impl BackupProvider for OfflineProvider {
    fn stage(&self, _manifest: &Manifest) -> reclaimd::Result<BackupRef> {
        Err(EngineError::BackupFailed("provider offline".into()))
    }

    fn verify(&self, _backup: &BackupRef) -> reclaimd::Result<BackupHealth> {
        Ok(BackupHealth::Missing)
    }

    fn retrieve(&self, _backup: &BackupRef, _path: &Path) -> reclaimd::Result<Vec<u8>> {
        Err(EngineError::BackupFailed("provider offline".into()))
    }
}

fn manual_item(path: &Path, category: Category, size: u64, score: u8) -> CleanableItem {
    CleanableItem {
        id: ItemId::new(),
        path: path.to_path_buf(),
        name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        category,
        size,
        modified: None,
        accessed: None,
        safety_score: score,
        fingerprint: None,
        explanation: None,
        from_cache: false,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn dry_run_clean_reports_bytes_without_touching_files() {
    let _guard = acquire_env_guard();
    let env = SandboxHome::new();
    let target = env.create_file(".cache/app/x", 10 * 1024 * 1024);

    let session = env.session();
    let results = session
        .scan(&CancellationToken::new(), None)
        .await
        .expect("scan should succeed");
    let items: Vec<CleanableItem> = results
        .items
        .iter()
        .filter(|i| i.path == target)
        .cloned()
        .collect();
    assert_eq!(items.len(), 1);

    let options = CleanOptions {
        dry_run: true,
        ..CleanOptions::default()
    };
    let outcome = session
        .clean(items, &options, &CancellationToken::new())
        .await
        .expect("dry run should succeed");

    assert!(outcome.dry_run);
    assert!(!outcome.aborted);
    assert_eq!(outcome.reclaimed_bytes, 10 * 1024 * 1024);
    assert_eq!(outcome.outcome_count(ItemOutcome::Deleted), 1);
    assert!(target.exists(), "dry run must not mutate the filesystem");

    let log = fs::read_to_string(env.audit_path()).expect("audit log written");
    assert!(log.contains("dry_run_clean"));
    assert!(log.contains("app/x"));
}

#[tokio::test(flavor = "multi_thread")]
async fn clean_moves_items_to_trash_and_reports_reclaimed_bytes() {
    let _guard = acquire_env_guard();
    let env = SandboxHome::new();
    let target = env.create_file(".cache/app/stale.bin", 4096);

    let session = env.session();
    let results = session
        .scan(&CancellationToken::new(), None)
        .await
        .expect("scan should succeed");
    let items: Vec<CleanableItem> = results
        .items
        .iter()
        .filter(|i| i.path == target)
        .cloned()
        .collect();

    let outcome = session
        .clean(items.clone(), &CleanOptions::default(), &CancellationToken::new())
        .await
        .expect("clean should succeed");

    assert_eq!(outcome.reclaimed_bytes, 4096);
    assert_eq!(outcome.outcome_count(ItemOutcome::Deleted), 1);
    assert!(!target.exists());
    let trash_entries = fs::read_dir(env.path().join(".Trash"))
        .expect("trash exists")
        .count();
    assert!(trash_entries >= 1);

    // a second clean over the same selection observes the race benignly
    let second = session
        .clean(items, &CleanOptions::default(), &CancellationToken::new())
        .await
        .expect("second clean should succeed");
    assert_eq!(second.outcome_count(ItemOutcome::AlreadyGone), 1);
    assert_eq!(second.reclaimed_bytes, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn guarded_paths_abort_the_clean() {
    let _guard = acquire_env_guard();
    let env = SandboxHome::new();
    let key = env.create_file(".ssh/id_rsa", 1024);

    let session = env.session();
    let item = manual_item(&key, Category::Orphaned, 1024, 100);
    let err = session
        .clean(vec![item], &CleanOptions::default(), &CancellationToken::new())
        .await
        .expect_err("guardrail paths abort the operation");

    assert!(matches!(err, EngineError::GuardrailViolation { .. }));
    assert!(key.exists(), "guarded paths must survive");
}

#[tokio::test(flavor = "multi_thread")]
async fn low_scoring_items_are_skipped_not_deleted() {
    let _guard = acquire_env_guard();
    let env = SandboxHome::new();
    let target = env.create_file("Downloads/maybe-important.bin", 1024);

    let session = env.session();
    let item = manual_item(&target, Category::LargeFiles, 1024, 10);
    let outcome = session
        .clean(vec![item], &CleanOptions::default(), &CancellationToken::new())
        .await
        .expect("clean should succeed");

    assert_eq!(outcome.outcome_count(ItemOutcome::SkippedUnsafe), 1);
    assert_eq!(outcome.reclaimed_bytes, 0);
    assert!(target.exists());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_deletion_rolls_back_the_transaction() {
    let _guard = acquire_env_guard();
    let env = SandboxHome::new();
    let keep = env.create_file(".cache/app/a-keep.bin", 2048);
    let fail = env.create_file(".cache/app/b-fail.bin", 2048);

    let session = env.session().with_provider(Arc::new(HealthyProvider));
    let results = session
        .scan(&CancellationToken::new(), None)
        .await
        .expect("scan should succeed");
    let items: Vec<CleanableItem> = results
        .items
        .iter()
        .filter(|i| i.path == keep || i.path == fail)
        .cloned()
        .collect();
    assert_eq!(items.len(), 2);

    std::env::set_var("RECLAIMD_FAIL_DELETE", "b-fail");
    // a configured provider turns backups on by default
    let options = session.clean_options();
    assert!(options.backup_before_delete);
    let outcome = session
        .clean(items, &options, &CancellationToken::new())
        .await
        .expect("clean returns a result even when aborted");
    std::env::remove_var("RECLAIMD_FAIL_DELETE");

    assert!(outcome.aborted);
    assert_eq!(outcome.backup_ref.as_deref(), Some("B"));

    let keep_result = outcome
        .outcomes
        .iter()
        .find(|o| o.path == keep)
        .expect("keep outcome");
    assert_eq!(keep_result.outcome, ItemOutcome::RolledBack);
    let fail_result = outcome
        .outcomes
        .iter()
        .find(|o| o.path == fail)
        .expect("fail outcome");
    assert_eq!(fail_result.outcome, ItemOutcome::Failed);

    assert!(keep.exists(), "trashed item must be restored");
    assert!(fail.exists(), "failed item was never removed");
    assert_eq!(outcome.reclaimed_bytes, 0);

    let log = fs::read_to_string(env.audit_path()).expect("audit log written");
    assert!(log.contains("transaction_opened"));
    assert!(log.contains("rollback"));
    assert!(log.contains("aborted"));
}

#[tokio::test(flavor = "multi_thread")]
async fn backup_failure_aborts_before_any_deletion() {
    let _guard = acquire_env_guard();
    let env = SandboxHome::new();
    let target = env.create_file(".cache/app/precious.bin", 2048);

    let session = env.session().with_provider(Arc::new(OfflineProvider));
    let results = session
        .scan(&CancellationToken::new(), None)
        .await
        .expect("scan should succeed");
    let items: Vec<CleanableItem> = results
        .items
        .iter()
        .filter(|i| i.path == target)
        .cloned()
        .collect();

    let options = CleanOptions {
        backup_before_delete: true,
        ..CleanOptions::default()
    };
    let err = session
        .clean(items, &options, &CancellationToken::new())
        .await
        .expect_err("backup failure must abort");
    assert!(matches!(err, EngineError::BackupFailed(_)));
    assert!(target.exists(), "nothing is deleted after a backup failure");
}

#[tokio::test(flavor = "multi_thread")]
async fn oversized_cleans_require_confirmation() {
    let _guard = acquire_env_guard();
    let env = SandboxHome::new();
    let target = env.create_file(".cache/app/huge.bin", 4096);

    let session = env.session();
    let item = manual_item(&target, Category::UserCaches, 4096, 90);
    let options = CleanOptions {
        confirm_over_bytes: 1024,
        ..CleanOptions::default()
    };
    let err = session
        .clean(vec![item.clone()], &options, &CancellationToken::new())
        .await
        .expect_err("must refuse without confirmation");
    assert!(matches!(err, EngineError::Configuration(_)));
    assert!(target.exists());

    let confirmed = CleanOptions {
        confirm_over_bytes: 1024,
        confirmed: true,
        ..CleanOptions::default()
    };
    let outcome = session
        .clean(vec![item], &confirmed, &CancellationToken::new())
        .await
        .expect("confirmed clean succeeds");
    assert_eq!(outcome.outcome_count(ItemOutcome::Deleted), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn audit_chain_verifies_after_a_full_run() {
    let _guard = acquire_env_guard();
    let env = SandboxHome::new();
    let target = env.create_file(".cache/app/entry.bin", 1024);

    let session = env.session();
    let results = session
        .scan(&CancellationToken::new(), None)
        .await
        .expect("scan should succeed");
    let items: Vec<CleanableItem> = results
        .items
        .iter()
        .filter(|i| i.path == target)
        .cloned()
        .collect();
    session
        .clean(items, &CleanOptions::default(), &CancellationToken::new())
        .await
        .expect("clean should succeed");

    let (tip, count) = AuditLog::verify_chain(&env.audit_path()).expect("chain verifies");
    assert!(count >= 4, "scan and clean both leave records");
    assert_eq!(tip.len(), 64);
}
