//! Outcome types shared by the graph, executor and front ends

use serde::{Deserialize, Serialize};

/// What happened to one operation on one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationOutcome {
    /// A condition was false, the operation was skipped
    NotRun,
    /// Nothing needed doing
    NoChange,
    /// Commands ran and succeeded
    Changed,
    /// A command, connection or condition failed
    Errored {
        error: String,
        /// Captured `IGNORE_ERRORS`: reported, but the host keeps going
        ignored: bool,
    },
}

impl OperationOutcome {
    /// Check if the outcome represents a change
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changed)
    }

    /// Check if the outcome represents success (no error, ignored or not)
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Errored { .. })
    }

    /// Whether the host must stop and count toward the fail percent
    pub fn fails_host(&self) -> bool {
        matches!(self, Self::Errored { ignored: false, .. })
    }
}

/// Outcome counts over a whole deploy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploySummary {
    pub changed: usize,
    pub no_change: usize,
    pub not_run: usize,
    pub errored: usize,
    pub ignored: usize,
    /// Hosts that failed and were removed from the run
    pub failed_hosts: Vec<String>,
}

impl DeploySummary {
    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &OperationOutcome) {
        match outcome {
            OperationOutcome::NotRun => self.not_run += 1,
            OperationOutcome::NoChange => self.no_change += 1,
            OperationOutcome::Changed => self.changed += 1,
            OperationOutcome::Errored { ignored: true, .. } => self.ignored += 1,
            OperationOutcome::Errored { ignored: false, .. } => self.errored += 1,
        }
    }

    /// Total number of (operation, host) outcomes
    pub fn total(&self) -> usize {
        self.changed + self.no_change + self.not_run + self.errored + self.ignored
    }

    /// No host failed
    pub fn is_success(&self) -> bool {
        self.errored == 0 && self.failed_hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        let ignored = OperationOutcome::Errored {
            error: "exit 1".into(),
            ignored: true,
        };
        assert!(!ignored.is_success());
        assert!(!ignored.fails_host());
        assert!(OperationOutcome::Changed.is_change());
        assert!(OperationOutcome::NotRun.is_success());
        assert!(!OperationOutcome::NoChange.is_change());
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = DeploySummary::default();
        summary.add_outcome(&OperationOutcome::Changed);
        summary.add_outcome(&OperationOutcome::NoChange);
        summary.add_outcome(&OperationOutcome::Errored {
            error: "x".into(),
            ignored: true,
        });
        assert_eq!(summary.total(), 3);
        assert!(summary.is_success());

        summary.add_outcome(&OperationOutcome::Errored {
            error: "x".into(),
            ignored: false,
        });
        summary.failed_hosts.push("web1".into());
        assert_eq!(summary.errored, 1);
        assert!(!summary.is_success());
    }
}
