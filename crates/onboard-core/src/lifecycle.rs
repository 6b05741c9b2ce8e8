use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Execution state of a single verification check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckState {
    Pending,
    Running,
    Passed,
    Failed,
    Errored,
}

impl CheckState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CheckState::Passed | CheckState::Failed | CheckState::Errored
        )
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckState::Pending => write!(f, "pending"),
            CheckState::Running => write!(f, "running"),
            CheckState::Passed => write!(f, "passed"),
            CheckState::Failed => write!(f, "failed"),
            CheckState::Errored => write!(f, "errored"),
        }
    }
}

/// `pending -> running -> {passed, failed, errored}`. A check may also be
/// errored before it runs (malformed definition, cancelled pool).
pub fn validate_transition(from: CheckState, to: CheckState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (CheckState::Pending, CheckState::Running | CheckState::Errored)
            | (
                CheckState::Running,
                CheckState::Passed | CheckState::Failed | CheckState::Errored
            )
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        assert!(validate_transition(CheckState::Pending, CheckState::Running).is_ok());
        assert!(validate_transition(CheckState::Pending, CheckState::Errored).is_ok());
        assert!(validate_transition(CheckState::Running, CheckState::Passed).is_ok());
        assert!(validate_transition(CheckState::Running, CheckState::Failed).is_ok());
        assert!(validate_transition(CheckState::Running, CheckState::Errored).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(CheckState::Pending, CheckState::Passed).is_err());
        assert!(validate_transition(CheckState::Pending, CheckState::Failed).is_err());
        assert!(validate_transition(CheckState::Running, CheckState::Running).is_err());
        assert!(validate_transition(CheckState::Passed, CheckState::Failed).is_err());
        assert!(validate_transition(CheckState::Errored, CheckState::Running).is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!CheckState::Pending.is_terminal());
        assert!(!CheckState::Running.is_terminal());
        assert!(CheckState::Passed.is_terminal());
        assert!(CheckState::Errored.is_terminal());
    }

    #[test]
    fn invalid_transition_error_names_states() {
        let err = validate_transition(CheckState::Passed, CheckState::Running).unwrap_err();
        assert_eq!(err.to_string(), "invalid check transition: passed -> running");
    }
}
