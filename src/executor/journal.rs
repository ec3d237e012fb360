use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::types::ItemId;

/// How a deletion was performed, with what is needed to reverse it.
#[derive(Debug, Clone)]
pub enum StepAction {
    TrashMoved { trashed_to: PathBuf },
    Unlinked { backup_ref: Option<String> },
}

#[derive(Debug, Clone)]
pub struct JournalStep {
    pub item: ItemId,
    pub path: PathBuf,
    pub action: StepAction,
    pub at: DateTime<Utc>,
}

/// In-memory reversal journal for one transaction. Steps for a single item
/// are totally ordered by the append lock.
pub struct TransactionJournal {
    transaction_id: String,
    steps: Mutex<Vec<JournalStep>>,
}

impl TransactionJournal {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        TransactionJournal {
            transaction_id: transaction_id.into(),
            steps: Mutex::new(Vec::new()),
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn record(&self, item: ItemId, path: PathBuf, action: StepAction) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(JournalStep {
                item,
                path,
                action,
                at: Utc::now(),
            });
        }
    }

    /// Steps in reverse order, for rollback.
    pub fn steps_for_rollback(&self) -> Vec<JournalStep> {
        let mut steps = self
            .steps
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        steps.reverse();
        steps
    }

    pub fn len(&self) -> usize {
        self.steps.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_order_is_reversed() {
        let journal = TransactionJournal::new("tx");
        let a = ItemId::new();
        let b = ItemId::new();
        journal.record(
            a,
            PathBuf::from("/home/u/a"),
            StepAction::TrashMoved {
                trashed_to: PathBuf::from("/home/u/.Trash/a"),
            },
        );
        journal.record(
            b,
            PathBuf::from("/home/u/b"),
            StepAction::Unlinked { backup_ref: None },
        );

        let steps = journal.steps_for_rollback();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].item, b);
        assert_eq!(steps[1].item, a);
    }
}
