use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::types::{Category, CleanableItem, RiskLevel, SAFE_THRESHOLD};

const GIB: u64 = 1024 * 1024 * 1024;

/// Pluggable scoring capability. The deterministic heuristic scorer below is
/// the mandatory default; alternative scorers compose on top but can never
/// raise a score above the auditor's cap (see [`apply_verdict_cap`]).
pub trait SafetyScorer: Send + Sync {
    /// Deterministic safety score in `[0, 100]`; higher is safer to delete.
    fn score(&self, item: &CleanableItem) -> u8;

    /// Short plain-language summary (~120 chars max) usable as a tooltip.
    fn explain(&self, item: &CleanableItem, score: u8) -> String;
}

/// Where a path lives, for explanation templates and location penalties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocationKind {
    Cache,
    Tmp,
    Documents,
    System,
    Home,
}

fn location_kind(path: &Path, home: &Path) -> LocationKind {
    let lower = path.to_string_lossy().to_lowercase();
    let segment = |name: &str| {
        lower
            .split('/')
            .any(|seg| seg == name || (name == "cache" && seg.contains("cache")))
    };

    if !path.starts_with(home) {
        return LocationKind::System;
    }
    if segment("cache") || segment(".cache") || lower.contains("/caches/") {
        return LocationKind::Cache;
    }
    if segment("tmp") || segment("temp") || segment(".trash") || segment("trash") {
        return LocationKind::Tmp;
    }
    if segment("documents") || segment("desktop") || segment("pictures") || segment("movies")
        || segment("music")
    {
        return LocationKind::Documents;
    }
    LocationKind::Home
}

pub struct HeuristicScorer {
    home: PathBuf,
}

impl HeuristicScorer {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        HeuristicScorer { home: home.into() }
    }

    fn base_score(category: Category) -> i32 {
        match category {
            Category::Trash => 95,
            Category::TemporaryFiles => 90,
            Category::Logs => 85,
            Category::UserCaches => 80,
            Category::AppCaches => 75,
            Category::BuildArtifacts => 72,
            Category::DeveloperJunk => 70,
            Category::Duplicates => 60,
            Category::LargeFiles => 50,
            Category::Orphaned => 40,
        }
    }
}

const USER_DOC_EXTENSIONS: &[&str] = &[
    "doc", "docx", "pages", "key", "numbers", "xls", "xlsx", "ppt", "pptx", "pdf", "psd",
    "sketch", "ai", "epub",
];

impl SafetyScorer for HeuristicScorer {
    fn score(&self, item: &CleanableItem) -> u8 {
        let mut score = Self::base_score(item.category);
        let location = location_kind(&item.path, &self.home);

        // Stale files are safer; very large ones warrant a closer look.
        let age_days = item
            .accessed
            .or(item.modified)
            .map(|t| Utc::now().signed_duration_since(t).num_days());
        match age_days {
            Some(days) if days > 180 => score += 10,
            Some(days) if days > 30 => score += 5,
            _ => {}
        }
        if item.size > GIB {
            score -= 5;
        }

        match location {
            LocationKind::Documents => score -= 25,
            LocationKind::System => score -= 100,
            _ => {}
        }

        if let Some(ext) = item.path.extension().and_then(|e| e.to_str()) {
            if USER_DOC_EXTENSIONS.contains(&ext.to_lowercase().as_str()) {
                score -= 20;
            }
        }

        let scratch = matches!(location, LocationKind::Cache | LocationKind::Tmp);
        if item.name.starts_with('.') && !scratch {
            score -= 10;
        }

        score.clamp(0, 100) as u8
    }

    fn explain(&self, item: &CleanableItem, score: u8) -> String {
        let what = match item.category {
            Category::Trash => "Trashed item",
            Category::TemporaryFiles => "Temporary file",
            Category::Logs => "Log file",
            Category::UserCaches => "User cache",
            Category::AppCaches => "Application cache",
            Category::BuildArtifacts => "Build output",
            Category::DeveloperJunk => "Developer cache",
            Category::Duplicates => "Duplicate copy",
            Category::LargeFiles => "Large file",
            Category::Orphaned => "Leftover data",
        };
        let place = match location_kind(&item.path, &self.home) {
            LocationKind::Cache => "in a cache directory",
            LocationKind::Tmp => "in a scratch location",
            LocationKind::Documents => "among your documents",
            LocationKind::System => "in a system area",
            LocationKind::Home => "in your home folder",
        };
        let advice = if score >= 85 {
            "safe to remove"
        } else if score >= SAFE_THRESHOLD {
            "generally safe to remove"
        } else if score >= 40 {
            "review before removing"
        } else {
            "not recommended for removal"
        };
        format!("{what} {place}; {advice}.")
    }
}

/// Cap a score by the auditor's verdict. A composed scorer may lower a
/// score further but can never lift it past this ceiling.
pub fn apply_verdict_cap(score: u8, risk: RiskLevel) -> u8 {
    match risk {
        RiskLevel::Minimal | RiskLevel::Low => score,
        RiskLevel::Medium => score.min(69),
        RiskLevel::High => score.min(39),
        RiskLevel::Critical => 0,
    }
}
