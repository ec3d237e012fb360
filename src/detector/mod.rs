//! Smart detector: heuristic safety scoring, duplicate grouping, and
//! per-item explanations.

mod duplicates;
mod score;

use std::path::Path;

pub use duplicates::{hash_file, DuplicateDetector};
pub use score::{apply_verdict_cap, HeuristicScorer, SafetyScorer};

use crate::types::{AuditVerdict, CleanableItem};

pub struct SmartDetector {
    scorer: Box<dyn SafetyScorer>,
}

impl SmartDetector {
    pub fn new(home: &Path) -> Self {
        SmartDetector {
            scorer: Box::new(HeuristicScorer::new(home)),
        }
    }

    /// Swap in a composed scorer. The auditor cap still applies on top.
    pub fn with_scorer(scorer: Box<dyn SafetyScorer>) -> Self {
        SmartDetector { scorer }
    }

    pub fn safety_score(&self, item: &CleanableItem) -> u8 {
        self.scorer.score(item)
    }

    pub fn explain(&self, item: &CleanableItem, score: u8) -> String {
        self.scorer.explain(item, score)
    }

    /// Re-score an item, cap it by the auditor's verdict when one is
    /// available, and attach the explanation.
    pub fn enhance(&self, mut item: CleanableItem, verdict: Option<&AuditVerdict>) -> CleanableItem {
        let mut score = self.scorer.score(&item);
        if let Some(verdict) = verdict {
            score = apply_verdict_cap(score, verdict.risk);
        }
        item.safety_score = score;
        item.explanation = Some(self.explain(&item, score));
        item
    }

    pub fn duplicate_detector(&self, include_zero_byte: bool) -> DuplicateDetector {
        DuplicateDetector::new(include_zero_byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Category, ItemId, RiskLevel};
    use std::path::PathBuf;

    fn cache_item() -> CleanableItem {
        CleanableItem {
            id: ItemId::new(),
            path: PathBuf::from("/home/u/.cache/app/blob"),
            name: "blob".into(),
            category: Category::UserCaches,
            size: 1024,
            modified: None,
            accessed: None,
            safety_score: 0,
            fingerprint: None,
            explanation: None,
            from_cache: false,
        }
    }

    #[test]
    fn enhance_attaches_score_and_explanation() {
        let detector = SmartDetector::new(Path::new("/home/u"));
        let item = detector.enhance(cache_item(), None);
        assert_eq!(item.safety_score, 80);
        assert!(item.explanation.is_some());
    }

    #[test]
    fn enhance_respects_the_verdict_cap() {
        let detector = SmartDetector::new(Path::new("/home/u"));
        let verdict =
            AuditVerdict::aggregate(RiskLevel::High, "held open".into(), Vec::new(), true);
        let item = detector.enhance(cache_item(), Some(&verdict));
        assert_eq!(item.safety_score, 39);
    }

    #[test]
    fn composed_scorer_cannot_exceed_the_cap() {
        struct Maximal;
        impl SafetyScorer for Maximal {
            fn score(&self, _item: &CleanableItem) -> u8 {
                100
            }
            fn explain(&self, _item: &CleanableItem, _score: u8) -> String {
                "always safe".into()
            }
        }

        let detector = SmartDetector::with_scorer(Box::new(Maximal));
        let verdict =
            AuditVerdict::aggregate(RiskLevel::Medium, "suspect".into(), Vec::new(), false);
        let item = detector.enhance(cache_item(), Some(&verdict));
        assert_eq!(item.safety_score, 69);
    }
}
