use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Languages the grader knows how to run.
///
/// The set is closed: adding a language means adding a variant here and a
/// row to the language table, never new control flow in the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[serde(alias = "py", alias = "python3")]
    Python,
    #[serde(alias = "js", alias = "node")]
    JavaScript,
    #[serde(alias = "c++", alias = "cc")]
    Cpp,
    Java,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::JavaScript,
        Language::Cpp,
        Language::Java,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "py" | "python3" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "cpp" | "c++" | "cc" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            other => Err(format!("unknown language '{}'", other)),
        }
    }
}

/// How actual output is compared to the expected output.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Comparator {
    /// Leading and trailing whitespace ignored on both sides.
    #[default]
    Trimmed,
    /// Byte-for-byte equality.
    Exact,
    /// Trailing whitespace on each line and trailing blank lines ignored.
    IgnoreTrailingWhitespace,
    /// Whitespace-separated tokens; numeric tokens may differ by `tolerance`
    /// (absolute or relative), everything else must match exactly.
    Numeric { tolerance: f64 },
}

/// A single input/expected-output pair. Never mutated after the problem is
/// loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    /// 1-based position within the problem
    pub id: u32,
    pub input: String,
    pub expected_output: String,
    pub points: u32,
    /// Hidden cases never reveal their expected output in feedback
    #[serde(default)]
    pub hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub test_cases: Vec<TestCase>,
    /// Per-case wall-clock limit; the engine default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<u64>,
    #[serde(default)]
    pub comparator: Comparator,
}

impl Problem {
    pub fn total_points(&self) -> u32 {
        self.test_cases
            .iter()
            .fold(0u32, |total, tc| total.saturating_add(tc.points))
    }
}

/// Lifecycle of a submission. Only the grader moves a submission forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Error)
    }

    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Error) | (Running, Completed) | (Running, Error)
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("illegal submission transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: SubmissionStatus,
    pub to: SubmissionStatus,
}

/// A user's attempt at a problem.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub problem_id: String,
    pub language: Language,
    pub source_code: String,
    pub submitted_at: DateTime<Utc>,
    status: SubmissionStatus,
    report: Option<GradeReport>,
    failure: Option<String>,
}

impl Submission {
    pub fn new(problem_id: impl Into<String>, language: Language, source_code: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            problem_id: problem_id.into(),
            language,
            source_code: source_code.into(),
            submitted_at: Utc::now(),
            status: SubmissionStatus::Pending,
            report: None,
            failure: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status
    }

    /// The grade report; present exactly when the status is `completed`.
    pub fn report(&self) -> Option<&GradeReport> {
        self.report.as_ref()
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn transition(&mut self, next: SubmissionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), TransitionError> {
        self.transition(SubmissionStatus::Running)
    }

    pub fn complete(&mut self, report: GradeReport) -> Result<(), TransitionError> {
        self.transition(SubmissionStatus::Completed)?;
        self.report = Some(report);
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(SubmissionStatus::Error)?;
        self.failure = Some(reason.into());
        Ok(())
    }
}

/// Verdict for a single test case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    RuntimeError,
    Timeout,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::RuntimeError => "runtime_error",
            TestStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of running one submission against one test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub test_id: u32,
    pub status: TestStatus,
    pub stdout: String,
    /// Sanitised and truncated
    pub stderr: String,
    pub execution_time_ms: u64,
    /// Either zero or the full points of the case
    pub points_earned: u32,
    pub hidden: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub submission_id: Uuid,
    pub problem_id: String,
    pub score: u32,
    pub max_score: u32,
    /// One entry per test case, in problem order
    pub results: Vec<ExecutionResult>,
    pub feedback: Vec<String>,
    pub execution_time_ms: u64,
}

impl GradeReport {
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.status == TestStatus::Passed)
    }

    pub fn to_response(&self) -> GradeResponse {
        GradeResponse {
            score: self.score,
            total: self.max_score,
            feedback: self.feedback.clone(),
        }
    }
}

/// What the web layer consumes: `{score, total, feedback}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeResponse {
    pub score: u32,
    pub total: u32,
    pub feedback: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(score: u32, max_score: u32) -> GradeReport {
        GradeReport {
            submission_id: Uuid::new_v4(),
            problem_id: "factorial".to_string(),
            score,
            max_score,
            results: vec![],
            feedback: vec!["Test 1: wrong".to_string()],
            execution_time_ms: 12,
        }
    }

    #[test]
    fn test_language_parsing() {
        assert_eq!("python".parse::<Language>(), Ok(Language::Python));
        assert_eq!("Py".parse::<Language>(), Ok(Language::Python));
        assert_eq!("c++".parse::<Language>(), Ok(Language::Cpp));
        assert_eq!("node".parse::<Language>(), Ok(Language::JavaScript));
        assert!("cobol".parse::<Language>().is_err());
    }

    #[test]
    fn test_language_serde_names() {
        assert_eq!(serde_json::to_string(&Language::JavaScript).unwrap(), "\"javascript\"");
        let lang: Language = serde_json::from_str("\"python3\"").unwrap();
        assert_eq!(lang, Language::Python);
    }

    #[test]
    fn test_comparator_format() {
        let c: Comparator = serde_json::from_str(r#"{"mode": "numeric", "tolerance": 0.001}"#).unwrap();
        assert_eq!(c, Comparator::Numeric { tolerance: 0.001 });
        let c: Comparator = serde_json::from_str(r#"{"mode": "exact"}"#).unwrap();
        assert_eq!(c, Comparator::Exact);
        assert_eq!(Comparator::default(), Comparator::Trimmed);
    }

    #[test]
    fn test_submission_lifecycle() {
        let mut submission = Submission::new("factorial", Language::Python, "print(120)");
        assert_eq!(submission.status(), SubmissionStatus::Pending);
        assert!(submission.report().is_none());

        submission.mark_running().unwrap();
        submission.complete(report(1, 1)).unwrap();

        assert_eq!(submission.status(), SubmissionStatus::Completed);
        assert_eq!(submission.report().map(|r| r.score), Some(1));
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut submission = Submission::new("factorial", Language::Python, "print(120)");
        submission.mark_running().unwrap();
        submission.fail("disk full").unwrap();

        assert_eq!(submission.failure_reason(), Some("disk full"));
        let err = submission.complete(report(0, 1)).unwrap_err();
        assert_eq!(err.from, SubmissionStatus::Error);
        assert!(submission.report().is_none());
        assert!(submission.mark_running().is_err());
    }

    #[test]
    fn test_cannot_complete_without_running() {
        let mut submission = Submission::new("factorial", Language::Python, "print(120)");
        assert!(submission.complete(report(1, 1)).is_err());
        assert_eq!(submission.status(), SubmissionStatus::Pending);
    }

    #[test]
    fn test_grade_response_projection() {
        let r = report(3, 5);
        let response = r.to_response();
        assert_eq!(response.score, 3);
        assert_eq!(response.total, 5);
        assert_eq!(response.feedback, vec!["Test 1: wrong".to_string()]);
    }
}
