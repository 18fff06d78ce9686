use serde::{Deserialize, Serialize};
use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

/// Exception name recorded for a worker that died without a result
pub const EXIT_STATUS_EXCEPTION: &str = "ExitStatus";

/// Exception name recorded for a worker killed at its deadline
pub const TIMEOUT_EXCEPTION: &str = "Timeout";

/// Innermost stack frame inside the target file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureLocation {
    pub filename: String,
    pub line: usize,
    #[serde(default)]
    pub function: Option<String>,
}

/// How a sandboxed program ended.
///
/// This is the value the worker writes as JSON; it never depends on the
/// driver's own error types.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialOutcome {
    pub exception: Option<String>,
    pub message: Option<String>,
    pub location: Option<FailureLocation>,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Clean,
    Exception,
    Timeout,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeKind::Clean => write!(f, "clean"),
            OutcomeKind::Exception => write!(f, "exception"),
            OutcomeKind::Timeout => write!(f, "timeout"),
        }
    }
}

impl TrialOutcome {
    pub fn clean() -> Self {
        Self::default()
    }

    pub fn timeout(deadline: Duration) -> Self {
        Self {
            exception: Some(TIMEOUT_EXCEPTION.to_string()),
            message: Some(format!("Killed after {:.1}s", deadline.as_secs_f64())),
            location: None,
            timed_out: true,
        }
    }

    /// The worker died without reporting; all we have is its status
    pub fn from_exit_status(status: ExitStatus) -> Self {
        if status.success() {
            return Self::clean();
        }
        Self {
            exception: Some(EXIT_STATUS_EXCEPTION.to_string()),
            message: Some(status.to_string()),
            location: None,
            timed_out: false,
        }
    }

    pub fn kind(&self) -> OutcomeKind {
        if self.timed_out {
            OutcomeKind::Timeout
        } else if self.exception.is_some() {
            OutcomeKind::Exception
        } else {
            OutcomeKind::Clean
        }
    }

    pub fn is_clean(&self) -> bool {
        self.kind() == OutcomeKind::Clean
    }

    /// Exception name, empty for a clean run
    pub fn exception_name(&self) -> &str {
        self.exception.as_deref().unwrap_or("")
    }

    /// Line of the failing frame in the target file
    pub fn line(&self) -> Option<usize> {
        self.location.as_ref().map(|l| l.line)
    }
}

impl fmt::Display for TrialOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            OutcomeKind::Clean => write!(f, "ran clean"),
            OutcomeKind::Timeout => write!(f, "timed out"),
            OutcomeKind::Exception => {
                write!(f, "{}", self.exception_name())?;
                if let Some(message) = self.message.as_deref().filter(|m| !m.is_empty()) {
                    write!(f, ": {}", message)?;
                }
                if let Some(location) = &self.location {
                    write!(f, " ({}:{})", location.filename, location.line)?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_worker_json() {
        let json = r#"{"exception": "NameError", "message": "name 'y' is not defined",
            "location": {"filename": "t.py", "line": 3, "function": "<module>"},
            "timed_out": false}"#;
        let outcome: TrialOutcome = serde_json::from_str(json).unwrap();
        assert_eq!(outcome.kind(), OutcomeKind::Exception);
        assert_eq!(outcome.line(), Some(3));
        assert_eq!(outcome.to_string(), "NameError: name 'y' is not defined (t.py:3)");

        let clean: TrialOutcome = serde_json::from_str("{}").unwrap();
        assert!(clean.is_clean());
        assert_eq!(clean.exception_name(), "");
    }

    #[test]
    fn test_timeout_kind() {
        let outcome = TrialOutcome::timeout(Duration::from_secs(2));
        assert_eq!(outcome.kind(), OutcomeKind::Timeout);
        assert_eq!(outcome.exception_name(), TIMEOUT_EXCEPTION);
        assert!(!outcome.is_clean());
    }
}
