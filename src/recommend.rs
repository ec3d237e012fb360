//! Recommendation synthesizer: turns scored items and duplicate groups into
//! a short, ordered list of user-approvable bundles.

use std::collections::{BTreeMap, HashSet};

use crate::auditor::SecurityAuditor;
use crate::types::{
    Category, CleanableItem, ItemId, Priority, Recommendation, ScanResults,
};

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Priority band from reclaimable bytes and safety score.
fn priority_for(bytes: u64, score: u8) -> Priority {
    if bytes >= GIB && score >= 85 {
        Priority::Critical
    } else if bytes >= 100 * MIB && score >= 80 {
        Priority::High
    } else if bytes >= 10 * MIB && score >= 70 {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Band for a duplicate group, driven by its wasted space alone.
fn duplicate_priority(wasted: u64) -> Priority {
    if wasted >= GIB {
        Priority::Critical
    } else if wasted >= 100 * MIB {
        Priority::High
    } else if wasted >= 10 * MIB {
        Priority::Medium
    } else {
        Priority::Low
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn category_rationale(category: Category) -> &'static str {
    match category {
        Category::UserCaches | Category::AppCaches => {
            "Applications rebuild these caches on demand"
        }
        Category::DeveloperJunk => "Package managers restore these directories on the next build",
        Category::BuildArtifacts => "Build outputs are regenerated by the toolchain",
        Category::Logs => "Old log files are kept only for troubleshooting",
        Category::TemporaryFiles => "Scratch files left behind by finished work",
        Category::Trash => "Items already discarded and awaiting removal",
        Category::Duplicates => "Identical copies of a file you already keep",
        Category::LargeFiles => "Large files worth reviewing for relevance",
        Category::Orphaned => "Data left behind by applications no longer present",
    }
}

fn title_for(category: Category, priority: Priority) -> String {
    let noun = match category {
        Category::UserCaches => "user caches",
        Category::AppCaches => "application caches",
        Category::DeveloperJunk => "developer caches",
        Category::BuildArtifacts => "build artifacts",
        Category::Logs => "old logs",
        Category::TemporaryFiles => "temporary files",
        Category::Trash => "trash",
        Category::Duplicates => "duplicate files",
        Category::LargeFiles => "large files",
        Category::Orphaned => "orphaned data",
    };
    let qualifier = match priority {
        Priority::Critical => "Major cleanup",
        Priority::High => "Significant cleanup",
        Priority::Medium => "Routine cleanup",
        Priority::Low => "Minor cleanup",
    };
    format!("{qualifier}: {noun}")
}

/// Build the ordered recommendation list. Every member is re-checked
/// against the auditor; anything that now blocks deletion is dropped, and
/// bundles that end up empty are discarded.
pub fn synthesize(results: &ScanResults, auditor: &SecurityAuditor) -> Vec<Recommendation> {
    let deletable = |item: &CleanableItem| !auditor.audit(&item.path).blocks_deletion;

    // Duplicate-group members get their own recommendations; keep them out
    // of the category bundles so nothing is proposed twice.
    let mut in_groups: HashSet<ItemId> = HashSet::new();
    for group in &results.duplicates {
        in_groups.insert(group.primary);
        in_groups.extend(group.redundant.iter().copied());
    }

    let mut bundles: BTreeMap<(Category, Priority), Vec<&CleanableItem>> = BTreeMap::new();
    for item in &results.items {
        if in_groups.contains(&item.id) {
            continue;
        }
        if !deletable(item) {
            continue;
        }
        let band = priority_for(item.size, item.safety_score);
        bundles.entry((item.category, band)).or_default().push(item);
    }

    let mut recommendations = Vec::new();
    for ((category, priority), mut items) in bundles {
        if items.is_empty() {
            continue;
        }
        items.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.path.cmp(&b.path)));
        let estimated: u64 = items.iter().map(|i| i.size).sum();
        recommendations.push(Recommendation {
            title: title_for(category, priority),
            description: format!(
                "{} item(s), about {} reclaimable. {}.",
                items.len(),
                human_bytes(estimated),
                category_rationale(category)
            ),
            priority,
            estimated_bytes: estimated,
            items: items.iter().map(|i| i.id).collect(),
        });
    }

    for group in &results.duplicates {
        let redundant: Vec<ItemId> = group
            .redundant
            .iter()
            .copied()
            .filter(|id| results.item(*id).map(deletable).unwrap_or(false))
            .collect();
        if redundant.is_empty() {
            continue;
        }
        let estimated = redundant.len() as u64 * group.size;
        let priority = duplicate_priority(estimated);
        let keeper = results
            .item(group.primary)
            .map(|i| i.path.display().to_string())
            .unwrap_or_else(|| "the original".to_string());
        recommendations.push(Recommendation {
            title: title_for(Category::Duplicates, priority),
            description: format!(
                "{} redundant cop(ies), about {} reclaimable; keeping {}. {}.",
                redundant.len(),
                human_bytes(estimated),
                keeper,
                category_rationale(Category::Duplicates)
            ),
            priority,
            estimated_bytes: estimated,
            items: redundant,
        });
    }

    recommendations.sort_by(|a, b| {
        b.estimated_bytes
            .cmp(&a.estimated_bytes)
            .then_with(|| b.priority.cmp(&a.priority))
            .then_with(|| a.title.cmp(&b.title))
    });
    recommendations
}
