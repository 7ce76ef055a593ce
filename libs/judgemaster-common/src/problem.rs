use crate::types::{Comparator, Problem, TestCase};
use serde::Deserialize;

/// Problem definition file format.
///
/// The historical format is a JSON object with a `test_cases` array whose
/// entries carry `input` and `output` strings; every other field is
/// optional so old definitions keep loading unchanged.
#[derive(Debug, Deserialize)]
struct ProblemFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    time_limit_ms: Option<u64>,
    #[serde(default)]
    comparator: Comparator,
    test_cases: Vec<TestCaseFile>,
}

#[derive(Debug, Deserialize)]
struct TestCaseFile {
    input: String,
    output: String,
    #[serde(default = "default_points")]
    points: u32,
    #[serde(default)]
    hidden: bool,
    #[serde(default)]
    description: Option<String>,
}

fn default_points() -> u32 {
    1
}

#[derive(Debug, thiserror::Error)]
pub enum ProblemFormatError {
    #[error("malformed problem definition: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid problem id '{0}'")]
    InvalidId(String),
    #[error("problem '{0}' has no test cases")]
    NoTestCases(String),
    #[error("test case {test_id} of problem '{problem_id}' is worth zero points")]
    ZeroPoints { problem_id: String, test_id: u32 },
    #[error("total points of problem '{0}' overflow")]
    PointsOverflow(String),
    #[error("problem '{0}' declares a zero time limit")]
    ZeroTimeLimit(String),
    #[error("problem '{0}' declares an invalid numeric tolerance")]
    InvalidTolerance(String),
}

/// Problem ids double as file names, so only a conservative alphabet is
/// accepted.
pub fn is_valid_problem_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Parse a problem definition. `fallback_id` (usually the file stem) is used
/// when the document does not name itself.
pub fn parse_problem(fallback_id: &str, json: &str) -> Result<Problem, ProblemFormatError> {
    let file: ProblemFile = serde_json::from_str(json)?;
    let id = file.id.unwrap_or_else(|| fallback_id.to_string());

    let test_cases = file
        .test_cases
        .into_iter()
        .enumerate()
        .map(|(idx, tc)| TestCase {
            id: (idx + 1) as u32,
            input: tc.input,
            expected_output: tc.output,
            points: tc.points,
            hidden: tc.hidden,
            description: tc.description,
        })
        .collect();

    let problem = Problem {
        id,
        title: file.title,
        test_cases,
        time_limit_ms: file.time_limit_ms,
        comparator: file.comparator,
    };

    validate_problem(&problem)?;
    Ok(problem)
}

/// Structural checks every problem must pass before it can be graded against.
pub fn validate_problem(problem: &Problem) -> Result<(), ProblemFormatError> {
    if !is_valid_problem_id(&problem.id) {
        return Err(ProblemFormatError::InvalidId(problem.id.clone()));
    }
    if problem.test_cases.is_empty() {
        return Err(ProblemFormatError::NoTestCases(problem.id.clone()));
    }
    if let Some(tc) = problem.test_cases.iter().find(|tc| tc.points == 0) {
        return Err(ProblemFormatError::ZeroPoints {
            problem_id: problem.id.clone(),
            test_id: tc.id,
        });
    }
    problem
        .test_cases
        .iter()
        .try_fold(0u32, |total, tc| total.checked_add(tc.points))
        .ok_or_else(|| ProblemFormatError::PointsOverflow(problem.id.clone()))?;
    if problem.time_limit_ms == Some(0) {
        return Err(ProblemFormatError::ZeroTimeLimit(problem.id.clone()));
    }
    if let Comparator::Numeric { tolerance } = problem.comparator {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ProblemFormatError::InvalidTolerance(problem.id.clone()));
        }
    }
    Ok(())
}
