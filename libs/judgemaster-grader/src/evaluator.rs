/// Test Evaluator - Language-Agnostic Scoring Logic
///
/// **Core Responsibility:**
/// Compare raw execution outputs against expected outputs and assign points.
///
/// **Critical Properties:**
/// - Knows nothing about processes, containers or languages
/// - Pure function: (execution outputs, problem) → verdicts and score
///
/// **Scoring Rules:**
/// - A passed case earns its full points, anything else earns zero
/// - score = sum of points of passed cases
/// - max_score = sum of points of all cases
///
/// **Verdict Precedence:**
/// 1. Timeout (a run that hit the limit never passes, whatever it printed)
/// 2. Runtime error (non-zero exit, signal, launch or compile failure)
/// 3. Output comparison under the problem's comparator
use judgemaster_common::types::{Comparator, ExecutionResult, Problem, TestCase, TestStatus};

/// Raw execution output for a single test case
/// Produced by an ExecutionEngine, consumed by the Evaluator
#[derive(Debug, Clone, Default)]
pub struct TestExecutionOutput {
    pub test_id: u32,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
    pub timed_out: bool,
    pub runtime_error: bool,
}

impl TestExecutionOutput {
    /// The submission could not be started or compiled for this case
    pub fn launch_failure(test_id: u32, message: impl Into<String>) -> Self {
        Self {
            test_id,
            stderr: message.into(),
            runtime_error: true,
            ..Default::default()
        }
    }
}

/// Everything the evaluator derives from one grading run
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub results: Vec<ExecutionResult>,
    pub score: u32,
    pub max_score: u32,
}

fn numbers_match(actual: f64, expected: f64, tolerance: f64) -> bool {
    let diff = (actual - expected).abs();
    diff <= tolerance || diff <= tolerance * actual.abs().max(expected.abs())
}

fn trailing_trimmed_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}

/// Decide whether `actual` is an acceptable rendering of `expected`
pub fn outputs_match(actual: &str, expected: &str, comparator: &Comparator) -> bool {
    match comparator {
        Comparator::Trimmed => actual.trim() == expected.trim(),
        Comparator::Exact => actual == expected,
        Comparator::IgnoreTrailingWhitespace => {
            trailing_trimmed_lines(actual) == trailing_trimmed_lines(expected)
        }
        Comparator::Numeric { tolerance } => {
            let actual_tokens: Vec<&str> = actual.split_whitespace().collect();
            let expected_tokens: Vec<&str> = expected.split_whitespace().collect();
            actual_tokens.len() == expected_tokens.len()
                && actual_tokens
                    .iter()
                    .zip(&expected_tokens)
                    .all(|(a, e)| {
                        if a == e {
                            return true;
                        }
                        match (a.parse::<f64>(), e.parse::<f64>()) {
                            // inf and nan only ever match literally
                            (Ok(a), Ok(e)) if a.is_finite() && e.is_finite() => {
                                numbers_match(a, e, *tolerance)
                            }
                            _ => false,
                        }
                    })
        }
    }
}

/// Evaluate a single test case execution output
pub fn evaluate_test(
    output: &TestExecutionOutput,
    test_case: &TestCase,
    comparator: &Comparator,
) -> ExecutionResult {
    let status = if output.timed_out {
        TestStatus::Timeout
    } else if output.runtime_error {
        TestStatus::RuntimeError
    } else if outputs_match(&output.stdout, &test_case.expected_output, comparator) {
        TestStatus::Passed
    } else {
        TestStatus::Failed
    };

    let points_earned = if status == TestStatus::Passed {
        test_case.points
    } else {
        0
    };

    ExecutionResult {
        test_id: test_case.id,
        status,
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
        execution_time_ms: output.execution_time_ms,
        points_earned,
        hidden: test_case.hidden,
    }
}

/// Pair outputs with the problem's test cases (both in problem order) and
/// total the points.
pub fn evaluate(problem: &Problem, outputs: &[TestExecutionOutput]) -> Evaluation {
    debug_assert_eq!(outputs.len(), problem.test_cases.len());

    let results: Vec<ExecutionResult> = problem
        .test_cases
        .iter()
        .zip(outputs)
        .map(|(test_case, output)| evaluate_test(output, test_case, &problem.comparator))
        .collect();

    let score = results
        .iter()
        .fold(0u32, |total, r| total.saturating_add(r.points_earned));

    Evaluation {
        results,
        score,
        max_score: problem.total_points(),
    }
}
