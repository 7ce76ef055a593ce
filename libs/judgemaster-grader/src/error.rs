//! Grader error taxonomy.
//!
//! Timeouts, runtime errors and wrong answers are *not* errors: they are
//! per-test verdicts folded into the grade report. Everything here aborts a
//! grading run, and the engine-fault variants are never attributable to the
//! student.

use judgemaster_common::types::{Language, TransitionError};

pub const UNAVAILABLE_MESSAGE: &str = "grading temporarily unavailable";

#[derive(Debug, thiserror::Error)]
pub enum GraderError {
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(Language),

    #[error("submission cannot be graded: {0}")]
    InvalidState(#[from] TransitionError),

    // Engine faults
    #[error("problem not found: {0}")]
    ProblemNotFound(String),

    #[error("invalid problem definition: {0}")]
    InvalidProblem(String),

    #[error("failed to prepare execution artifact: {0}")]
    Artifact(#[source] std::io::Error),

    #[error("execution backend failure: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("grading cancelled")]
    Cancelled,
}

impl GraderError {
    /// Infrastructure failures the caller must not mistake for a zero score.
    pub fn is_engine_fault(&self) -> bool {
        matches!(
            self,
            GraderError::ProblemNotFound(_)
                | GraderError::InvalidProblem(_)
                | GraderError::Artifact(_)
                | GraderError::Backend(_)
        )
    }

    /// Short machine-readable code for logs, metrics and API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GraderError::InvalidSubmission(_) => "invalid_submission",
            GraderError::UnsupportedLanguage(_) => "unsupported_language",
            GraderError::InvalidState(_) => "invalid_state",
            GraderError::ProblemNotFound(_) => "problem_not_found",
            GraderError::InvalidProblem(_) => "invalid_problem",
            GraderError::Artifact(_) => "artifact_failure",
            GraderError::Backend(_) => "backend_failure",
            GraderError::Cancelled => "cancelled",
        }
    }

    /// Text safe to show a student. Engine faults never expose internals.
    pub fn user_message(&self) -> String {
        if self.is_engine_fault() {
            UNAVAILABLE_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_fault_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/var/lib/secret");
        assert!(GraderError::Artifact(io).is_engine_fault());
        assert!(GraderError::ProblemNotFound("factorial".into()).is_engine_fault());
        assert!(GraderError::Backend(anyhow::anyhow!("docker down")).is_engine_fault());

        assert!(!GraderError::InvalidSubmission("empty".into()).is_engine_fault());
        assert!(!GraderError::UnsupportedLanguage(Language::Java).is_engine_fault());
        assert!(!GraderError::Cancelled.is_engine_fault());
    }

    #[test]
    fn test_user_message_hides_internals() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/var/lib/secret");
        let err = GraderError::Artifact(io);
        assert_eq!(err.user_message(), UNAVAILABLE_MESSAGE);
        assert!(!err.user_message().contains("/var/lib"));

        let err = GraderError::InvalidSubmission("source code is empty".into());
        assert_eq!(err.user_message(), "invalid submission: source code is empty");
    }
}
