//! # Label Reconciliation
//!
//! Diffs the violations of one repository against the labels already
//! applied to it and produces the minimal add/remove set.
//!
//! Reconciliation is scoped to the compliance label namespace
//! ([`LABEL_TABLE`]). Any other label on the repository is left alone, so
//! teams can keep their own labels next to the managed ones.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::violation::{ViolationKind, ViolationSet, LABEL_TABLE};

/// Label changes required for one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMutation {
    /// Repository the mutation targets.
    pub repository: String,
    /// Managed labels to create.
    pub labels_to_add: BTreeSet<String>,
    /// Managed labels to delete.
    pub labels_to_remove: BTreeSet<String>,
}

impl LabelMutation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels_to_add.is_empty() && self.labels_to_remove.is_empty()
    }

    /// Label set after this mutation is applied to `current`.
    #[must_use]
    pub fn apply(&self, current: &BTreeSet<String>) -> BTreeSet<String> {
        current
            .iter()
            .filter(|label| !self.labels_to_remove.contains(*label))
            .chain(self.labels_to_add.iter())
            .cloned()
            .collect()
    }

    /// Violation kinds behind the labels being added.
    #[must_use]
    pub fn added_kinds(&self) -> Vec<ViolationKind> {
        self.labels_to_add
            .iter()
            .filter_map(|name| ViolationKind::from_label(name))
            .collect()
    }
}

/// Computes label mutations from violation sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelReconciler;

impl LabelReconciler {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Diff `violations` against `current_labels`.
    #[must_use]
    pub fn reconcile(
        &self,
        repository: &str,
        current_labels: &BTreeSet<String>,
        violations: &ViolationSet,
    ) -> LabelMutation {
        let mut mutation = LabelMutation {
            repository: repository.to_string(),
            ..LabelMutation::default()
        };

        for label in &LABEL_TABLE {
            let violated = violations.contains(&label.kind);
            let applied = current_labels.contains(label.name);

            if violated && !applied {
                mutation.labels_to_add.insert(label.name.to_string());
            } else if !violated && applied {
                mutation.labels_to_remove.insert(label.name.to_string());
            }
        }

        mutation
    }
}
