use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Score at or above which an item is considered safe for automated cleanup.
pub const SAFE_THRESHOLD: u8 = 70;

/// Stable identifier for a cleanable item within a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        ItemId(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Full-content fingerprint, lowercase hex of a 256-bit digest.
pub type Fingerprint = String;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    UserCaches,
    AppCaches,
    DeveloperJunk,
    BuildArtifacts,
    Logs,
    TemporaryFiles,
    Trash,
    Duplicates,
    LargeFiles,
    Orphaned,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::UserCaches,
        Category::AppCaches,
        Category::DeveloperJunk,
        Category::BuildArtifacts,
        Category::Logs,
        Category::TemporaryFiles,
        Category::Trash,
        Category::Duplicates,
        Category::LargeFiles,
        Category::Orphaned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::UserCaches => "user-caches",
            Category::AppCaches => "app-caches",
            Category::DeveloperJunk => "developer-junk",
            Category::BuildArtifacts => "build-artifacts",
            Category::Logs => "logs",
            Category::TemporaryFiles => "temporary-files",
            Category::Trash => "trash",
            Category::Duplicates => "duplicates",
            Category::LargeFiles => "large-files",
            Category::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Category::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Filter over categories with the named unions from the scan contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScanCategories(BTreeSet<Category>);

impl ScanCategories {
    /// Categories whose contents are regenerable or already discarded.
    pub fn safe() -> Self {
        ScanCategories(
            [
                Category::UserCaches,
                Category::AppCaches,
                Category::Logs,
                Category::Trash,
                Category::TemporaryFiles,
            ]
            .into_iter()
            .collect(),
        )
    }

    pub fn developer() -> Self {
        ScanCategories(
            [Category::DeveloperJunk, Category::BuildArtifacts]
                .into_iter()
                .collect(),
        )
    }

    pub fn all() -> Self {
        ScanCategories(Category::ALL.into_iter().collect())
    }

    pub fn contains(&self, category: Category) -> bool {
        self.0.contains(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = Category> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Category> for ScanCategories {
    fn from_iter<T: IntoIterator<Item = Category>>(iter: T) -> Self {
        ScanCategories(iter.into_iter().collect())
    }
}

impl FromStr for ScanCategories {
    type Err = String;

    /// Accepts the named unions (`safe`, `developer`, `all`) or a
    /// comma-separated category list.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "safe" => Ok(ScanCategories::safe()),
            "developer" => Ok(ScanCategories::developer()),
            "all" => Ok(ScanCategories::all()),
            list => list
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(Category::from_str)
                .collect::<std::result::Result<_, _>>(),
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

/// Risk assessment for a path produced before any destructive operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditVerdict {
    pub risk: RiskLevel,
    pub reason: String,
    pub violated_guardrails: Vec<String>,
    pub blocks_deletion: bool,
}

impl AuditVerdict {
    pub fn minimal(reason: impl Into<String>) -> Self {
        AuditVerdict {
            risk: RiskLevel::Minimal,
            reason: reason.into(),
            violated_guardrails: Vec::new(),
            blocks_deletion: false,
        }
    }

    pub fn critical(reason: impl Into<String>, guardrails: Vec<String>) -> Self {
        AuditVerdict {
            risk: RiskLevel::Critical,
            reason: reason.into(),
            violated_guardrails: guardrails,
            blocks_deletion: true,
        }
    }

    /// Builds a verdict from aggregated findings, enforcing the level
    /// invariants (critical always blocks, minimal never does).
    pub fn aggregate(
        risk: RiskLevel,
        reason: String,
        guardrails: Vec<String>,
        blocks: bool,
    ) -> Self {
        let blocks_deletion = match risk {
            RiskLevel::Critical => true,
            RiskLevel::Minimal => false,
            _ => blocks,
        };
        AuditVerdict {
            risk,
            reason,
            violated_guardrails: guardrails,
            blocks_deletion,
        }
    }
}

/// A reclaimable artifact discovered by the scanner.
///
/// Owned by the scan session; the safety score is refined by the detector
/// and consumed by the synthesizer and executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanableItem {
    pub id: ItemId,
    pub path: PathBuf,
    pub name: String,
    pub category: Category,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub safety_score: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    /// Short plain-language summary suitable for a tooltip.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// Replayed from the index cache rather than read from disk.
    #[serde(default)]
    pub from_cache: bool,
}

/// Items sharing identical content, with a designated member to keep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub fingerprint: Fingerprint,
    pub size: u64,
    pub primary: ItemId,
    pub redundant: Vec<ItemId>,
    pub wasted_bytes: u64,
}

impl DuplicateGroup {
    pub fn member_count(&self) -> usize {
        self.redundant.len() + 1
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// A user-reviewable bundle of items proposed for cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub estimated_bytes: u64,
    pub items: Vec<ItemId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryReport {
    pub name: String,
    pub size: u64,
    pub count: usize,
}

/// Aggregate output of one scan session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResults {
    pub session_id: String,
    pub items: Vec<CleanableItem>,
    pub duplicates: Vec<DuplicateGroup>,
    pub total_size: u64,
    pub safe_total_size: u64,
    /// Bytes belonging to items enumerated from disk this scan.
    pub bytes_read: u64,
    /// Bytes belonging to items replayed from the index cache.
    pub bytes_replayed: u64,
    pub cancelled: bool,
}

impl ScanResults {
    pub fn new(
        session_id: String,
        items: Vec<CleanableItem>,
        duplicates: Vec<DuplicateGroup>,
        cancelled: bool,
    ) -> Self {
        let total_size = items.iter().map(|i| i.size).sum();
        let safe_total_size = items
            .iter()
            .filter(|i| i.safety_score >= SAFE_THRESHOLD)
            .map(|i| i.size)
            .sum();
        let bytes_replayed = items
            .iter()
            .filter(|i| i.from_cache)
            .map(|i| i.size)
            .sum::<u64>();
        ScanResults {
            session_id,
            items,
            duplicates,
            total_size,
            safe_total_size,
            bytes_read: total_size - bytes_replayed,
            bytes_replayed,
            cancelled,
        }
    }

    pub fn item(&self, id: ItemId) -> Option<&CleanableItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Per-category totals for reporting.
    pub fn category_reports(&self) -> Vec<CategoryReport> {
        let mut by_category: BTreeMap<Category, (u64, usize)> = BTreeMap::new();
        for item in &self.items {
            let entry = by_category.entry(item.category).or_insert((0, 0));
            entry.0 += item.size;
            entry.1 += 1;
        }
        by_category
            .into_iter()
            .map(|(category, (size, count))| CategoryReport {
                name: category.as_str().to_string(),
                size,
                count,
            })
            .collect()
    }

    pub fn safe_items(&self) -> Vec<&CleanableItem> {
        self.items
            .iter()
            .filter(|i| i.safety_score >= SAFE_THRESHOLD)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ItemOutcome {
    Deleted,
    SkippedUnsafe,
    SkippedUser,
    AlreadyGone,
    Failed,
    RolledBack,
    RolledBackPartial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemResult {
    pub id: ItemId,
    pub path: PathBuf,
    pub outcome: ItemOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Terminal outcome of a clean invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanResult {
    pub transaction_id: String,
    pub outcomes: Vec<ItemResult>,
    pub reclaimed_bytes: u64,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_ref: Option<String>,
    /// True when a mid-transaction failure triggered rollback.
    pub aborted: bool,
}

impl CleanResult {
    pub fn outcome_count(&self, outcome: ItemOutcome) -> usize {
        self.outcomes.iter().filter(|o| o.outcome == outcome).count()
    }

    /// Typed error describing an aborted transaction, for callers that
    /// propagate failure instead of inspecting outcomes.
    pub fn abort_error(&self) -> crate::error::EngineError {
        let restored = self
            .outcomes
            .iter()
            .filter(|o| o.outcome == ItemOutcome::RolledBack)
            .map(|o| o.path.clone())
            .collect();
        let residual = self
            .outcomes
            .iter()
            .filter(|o| o.outcome == ItemOutcome::RolledBackPartial)
            .map(|o| o.path.clone())
            .collect();
        crate::error::EngineError::TransactionAborted { restored, residual }
    }
}
