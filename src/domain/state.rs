use std::error::Error;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentState {
    Pending,
    InProgress,
    Completed,
}

impl AssignmentState {
    pub const ALL: [AssignmentState; 3] = [
        AssignmentState::Pending,
        AssignmentState::InProgress,
        AssignmentState::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AssignmentState::Pending => "pending",
            AssignmentState::InProgress => "in_progress",
            AssignmentState::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AssignmentState::Completed)
    }

    pub fn is_open(self) -> bool {
        !self.is_terminal()
    }

    /// `in_progress` is informational, so `pending -> completed` is allowed.
    /// Leaving `completed` only happens through reversion, never through a
    /// forward transition.
    pub fn can_transition_to(self, next: AssignmentState) -> bool {
        matches!(
            (self, next),
            (AssignmentState::Pending, AssignmentState::InProgress)
                | (AssignmentState::InProgress, AssignmentState::InProgress)
                | (AssignmentState::Pending, AssignmentState::Completed)
                | (AssignmentState::InProgress, AssignmentState::Completed)
        )
    }

    pub fn validate_transition(self, next: AssignmentState) -> Result<(), InvalidStateTransition> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(InvalidStateTransition {
            from: self,
            to: next,
        })
    }
}

impl fmt::Display for AssignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentState {
    type Err = ParseStateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        let state = match normalized.as_str() {
            "pending" => AssignmentState::Pending,
            "in_progress" | "started" => AssignmentState::InProgress,
            "completed" | "done" => AssignmentState::Completed,
            _ => {
                return Err(ParseStateError {
                    value: value.to_string(),
                    expected: AssignmentState::ALL.iter().map(|s| s.as_str()).collect(),
                });
            }
        };
        Ok(state)
    }
}

/// Reporting state of a standalone completion record. It never feeds back
/// into the owning assignment's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    Submitted,
    Approved,
    Rejected,
}

impl ReportState {
    pub const ALL: [ReportState; 3] = [
        ReportState::Submitted,
        ReportState::Approved,
        ReportState::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportState::Submitted => "submitted",
            ReportState::Approved => "approved",
            ReportState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportState {
    type Err = ParseStateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "submitted" => Ok(ReportState::Submitted),
            "approved" => Ok(ReportState::Approved),
            "rejected" => Ok(ReportState::Rejected),
            _ => Err(ParseStateError {
                value: value.to_string(),
                expected: ReportState::ALL.iter().map(|s| s.as_str()).collect(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseStateError {
    value: String,
    expected: Vec<&'static str>,
}

impl fmt::Display for ParseStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid state '{}': expected one of {}",
            self.value,
            self.expected.join(", ")
        )
    }
}

impl Error for ParseStateError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidStateTransition {
    pub from: AssignmentState,
    pub to: AssignmentState,
}

impl fmt::Display for InvalidStateTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid state transition: {} -> {}", self.from, self.to)
    }
}

impl Error for InvalidStateTransition {}

#[cfg(test)]
mod tests {
    use super::{AssignmentState, ReportState};
    use std::str::FromStr;

    #[test]
    fn parses_state_names_and_aliases() {
        assert_eq!(
            AssignmentState::from_str("in-progress").unwrap(),
            AssignmentState::InProgress
        );
        assert_eq!(
            AssignmentState::from_str(" Done ").unwrap(),
            AssignmentState::Completed
        );
        assert_eq!(
            ReportState::from_str("REJECTED").unwrap(),
            ReportState::Rejected
        );
    }

    #[test]
    fn unknown_state_error_lists_expected_values() {
        let err = AssignmentState::from_str("rejected").expect_err("not an assignment state");
        let message = err.to_string();
        assert!(message.contains("pending, in_progress, completed"));
    }

    #[test]
    fn completed_is_terminal_for_forward_transitions() {
        for next in AssignmentState::ALL {
            assert!(AssignmentState::Completed
                .validate_transition(next)
                .is_err());
        }
    }

    #[test]
    fn progress_is_optional_on_the_way_to_completed() {
        assert!(AssignmentState::Pending
            .validate_transition(AssignmentState::Completed)
            .is_ok());
        assert!(AssignmentState::Pending
            .validate_transition(AssignmentState::InProgress)
            .is_ok());
        assert!(AssignmentState::InProgress
            .validate_transition(AssignmentState::Completed)
            .is_ok());
        assert!(AssignmentState::InProgress
            .validate_transition(AssignmentState::Pending)
            .is_err());
    }
}
