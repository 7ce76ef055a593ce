//! Student-facing feedback lines and diagnostic hygiene.
//!
//! Hidden cases never reveal their input or expected output, and raw
//! interpreter output is always cut to a fixed character budget after the
//! artifact paths have been stripped.

use crate::artifact::ExecutionArtifact;
use judgemaster_common::types::{ExecutionResult, Problem, TestStatus};

/// Characters of input/expected/actual shown per feedback line
const VALUE_PREVIEW_CHARS: usize = 200;

/// Keep at most `budget` characters from the start of `text`.
pub fn truncate_head(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Keep at most `budget` characters from the end of `text`. Interpreter
/// traces put the actual exception last, so runtime stderr is cut this way.
pub fn truncate_tail(text: &str, budget: usize) -> String {
    let total = text.chars().count();
    if total <= budget {
        return text.to_string();
    }
    let skip = total - budget;
    match text.char_indices().nth(skip) {
        Some((cut, _)) => format!("...{}", &text[cut..]),
        None => String::new(),
    }
}

/// Sanitise runtime stderr for storage and display.
pub fn clean_stderr(artifact: &ExecutionArtifact, raw: &str, budget: usize) -> String {
    truncate_tail(artifact.sanitize(raw).trim(), budget)
}

/// Sanitise compiler output; the first error is the useful one.
pub fn clean_diagnostics(artifact: &ExecutionArtifact, raw: &str, budget: usize) -> String {
    truncate_head(artifact.sanitize(raw).trim(), budget)
}

fn preview(text: &str) -> String {
    format!("{:?}", truncate_head(text.trim(), VALUE_PREVIEW_CHARS))
}

/// One line per failed or errored case, in problem order.
pub fn build_feedback(problem: &Problem, results: &[ExecutionResult], timeout_ms: u64) -> Vec<String> {
    problem
        .test_cases
        .iter()
        .zip(results)
        .filter(|(_, result)| result.status != TestStatus::Passed)
        .map(|(test_case, result)| {
            if test_case.hidden {
                return match result.status {
                    TestStatus::Failed => {
                        format!("Test {} (hidden): failed, output did not match", test_case.id)
                    }
                    _ => format!("Test {} (hidden): failed", test_case.id),
                };
            }

            match result.status {
                TestStatus::Failed => format!(
                    "Test {}: input {} → expected {}, got {}",
                    test_case.id,
                    preview(&test_case.input),
                    preview(&test_case.expected_output),
                    preview(&result.stdout)
                ),
                TestStatus::RuntimeError if result.stderr.is_empty() => {
                    format!("Test {}: runtime error", test_case.id)
                }
                TestStatus::RuntimeError => {
                    format!("Test {}: runtime error: {}", test_case.id, result.stderr)
                }
                TestStatus::Timeout => format!(
                    "Test {}: time limit exceeded ({} ms)",
                    test_case.id, timeout_ms
                ),
                TestStatus::Passed => unreachable!("passed cases are filtered out"),
            }
        })
        .collect()
}
