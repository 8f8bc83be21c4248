//! In-memory evaluation of a parsed filter against a cached issue.
//!
//! Only the facts that can drift after an issue was found by a remote
//! search are checked: open/closed state, assignees, labels and milestone.
//! Negated terms are not evaluated.

use super::{FilterQuery, IsFlag};
use crate::model::Issue;

impl FilterQuery {
    /// Whether `issue` still satisfies the positive side of this filter.
    ///
    /// Assignees match if any listed name is assigned; labels match only if
    /// every listed label is present.
    #[must_use]
    pub fn matches(&self, issue: &Issue) -> bool {
        let p = &self.positive;

        if p.is.contains(&IsFlag::Open) && issue.is_closed() {
            return false;
        }
        if p.is.contains(&IsFlag::Closed) && !issue.is_closed() {
            return false;
        }

        if !p.assignees.is_empty() && !p.assignees.iter().any(|name| issue.has_assignee(name)) {
            return false;
        }

        if !p.labels.is_empty() && !p.labels.iter().all(|label| issue.has_label(label)) {
            return false;
        }

        if !p.milestones.is_empty() {
            let Some(title) = issue.milestone.as_deref().map(str::to_lowercase) else {
                return false;
            };
            if !p.milestones.iter().any(|m| *m == title) {
                return false;
            }
        }

        true
    }

    #[must_use]
    pub fn is_mismatch(&self, issue: &Issue) -> bool {
        !self.matches(issue)
    }
}
