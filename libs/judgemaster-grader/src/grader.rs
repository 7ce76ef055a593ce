/// Grader - High-Level Orchestration
///
/// **Responsibility:**
/// Turn one submission and one problem into a [`GradeReport`].
///
/// **Architecture:**
/// 1. Validate the submission and problem
/// 2. Materialise the source into a private artifact directory
/// 3. Compile once when the language needs it
/// 4. Run every test case in problem order through the ExecutionEngine
/// 5. Score the raw outputs with the Evaluator
/// 6. Render feedback and move the submission to its terminal state
///
/// This module is the glue layer. It knows nothing about:
/// - How code executes (engine's job)
/// - How scoring works (evaluator's job)
///
/// A `Grader` holds no per-submission state, so one instance can grade any
/// number of submissions concurrently.
use crate::artifact::ExecutionArtifact;
use crate::config::{LanguageConfig, LanguageConfigManager};
use crate::docker::DockerEngine;
use crate::engine::{ExecutionEngine, ProcessEngine};
use crate::error::GraderError;
use crate::evaluator::{self, TestExecutionOutput};
use crate::feedback::{build_feedback, clean_diagnostics, clean_stderr};
use judgemaster_common::config::{BackendKind, Settings, DEFAULT_STDERR_BUDGET, DEFAULT_TIMEOUT_MS};
use judgemaster_common::problem::validate_problem;
use judgemaster_common::types::{GradeReport, Problem, Submission};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Safety limits to keep pathological inputs away from the backends
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

const COMPILATION_FAILED: &str = "compilation failed";

#[derive(Debug, Clone)]
pub struct GraderOptions {
    /// Applied when the problem does not declare its own limit
    pub default_timeout: Duration,
    /// Characters of stderr kept per case and of compiler diagnostics
    pub stderr_budget: usize,
    /// Parent directory for artifacts; the system temp dir when unset
    pub artifact_root: Option<PathBuf>,
}

impl Default for GraderOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            stderr_budget: DEFAULT_STDERR_BUDGET,
            artifact_root: None,
        }
    }
}

impl GraderOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            default_timeout: Duration::from_millis(settings.default_timeout_ms),
            stderr_budget: settings.stderr_budget,
            artifact_root: None,
        }
    }
}

pub struct Grader {
    engine: Arc<dyn ExecutionEngine>,
    languages: LanguageConfigManager,
    options: GraderOptions,
}

impl Grader {
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        languages: LanguageConfigManager,
        options: GraderOptions,
    ) -> Self {
        Self {
            engine,
            languages,
            options,
        }
    }

    /// Build the grader the environment asks for: language table from the
    /// configured file (or built-ins) and the selected backend.
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let languages = LanguageConfigManager::load_or_builtin(&settings.languages_config)?;
        let engine: Arc<dyn ExecutionEngine> = match settings.backend {
            BackendKind::Process => Arc::new(ProcessEngine::new()),
            BackendKind::Docker => Arc::new(DockerEngine::connect()?),
        };
        Ok(Self::new(engine, languages, GraderOptions::from_settings(settings)))
    }

    pub fn languages(&self) -> &LanguageConfigManager {
        &self.languages
    }

    pub fn engine_name(&self) -> &'static str {
        self.engine.name()
    }

    pub fn options(&self) -> &GraderOptions {
        &self.options
    }

    /// Grade `submission` against `problem`.
    ///
    /// On success the submission ends `completed` with the report attached.
    /// On any error it ends `error`, except when it was not `pending` to
    /// begin with, in which case it is left untouched and
    /// [`GraderError::InvalidState`] is returned.
    #[instrument(
        skip_all,
        fields(
            submission_id = %submission.id,
            problem_id = %problem.id,
            language = %submission.language,
            backend = self.engine.name()
        )
    )]
    pub async fn grade(
        &self,
        submission: &mut Submission,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<GradeReport, GraderError> {
        submission.mark_running()?;

        match self.run_grading(submission, problem, cancel).await {
            Ok(report) => {
                info!(
                    score = report.score,
                    max_score = report.max_score,
                    execution_ms = report.execution_time_ms,
                    "Grading completed"
                );
                submission.complete(report.clone())?;
                Ok(report)
            }
            Err(e) => {
                if e.is_engine_fault() {
                    error!(code = e.code(), error = %e, "Grading aborted by engine fault");
                } else {
                    warn!(code = e.code(), error = %e, "Grading aborted");
                }
                submission.fail(e.user_message())?;
                Err(e)
            }
        }
    }

    fn resolve_language(&self, submission: &Submission) -> Result<&LanguageConfig, GraderError> {
        self.languages
            .get_config(&submission.language)
            .ok_or(GraderError::UnsupportedLanguage(submission.language))
    }

    async fn run_grading(
        &self,
        submission: &Submission,
        problem: &Problem,
        cancel: &CancellationToken,
    ) -> Result<GradeReport, GraderError> {
        let start = Instant::now();

        if submission.source_code.trim().is_empty() {
            return Err(GraderError::InvalidSubmission("source code is empty".to_string()));
        }
        if submission.source_code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(GraderError::InvalidSubmission(format!(
                "source code exceeds maximum size of {} bytes",
                MAX_SOURCE_CODE_BYTES
            )));
        }
        if submission.problem_id != problem.id {
            return Err(GraderError::InvalidSubmission(format!(
                "submission targets problem '{}', not '{}'",
                submission.problem_id, problem.id
            )));
        }
        let language = self.resolve_language(submission)?;

        validate_problem(problem).map_err(|e| GraderError::InvalidProblem(e.to_string()))?;
        if let Some(tc) = problem
            .test_cases
            .iter()
            .find(|tc| tc.input.len() > MAX_TEST_INPUT_BYTES)
        {
            return Err(GraderError::InvalidProblem(format!(
                "input of test case {} exceeds maximum size of {} bytes",
                tc.id, MAX_TEST_INPUT_BYTES
            )));
        }

        let timeout = problem
            .time_limit_ms
            .map(Duration::from_millis)
            .unwrap_or(self.options.default_timeout);
        let budget = self.options.stderr_budget;

        let artifact = ExecutionArtifact::materialize(
            self.options.artifact_root.as_deref(),
            language,
            &submission.source_code,
        )
        .await
        .map_err(GraderError::Artifact)?;
        debug!(artifact = %artifact.dir().display(), "Artifact materialised");

        let compilation = self.engine.compile(&artifact, language, cancel).await?;
        if cancel.is_cancelled() {
            return Err(GraderError::Cancelled);
        }

        let mut feedback = Vec::new();
        let outputs = if compilation.success {
            self.run_test_cases(&artifact, language, problem, timeout, cancel)
                .await?
        } else {
            let diagnostics = clean_diagnostics(&artifact, &compilation.diagnostics, budget);
            warn!("Compilation failed; all tests marked as runtime errors");
            feedback.push(if diagnostics.is_empty() {
                "Compilation failed".to_string()
            } else {
                format!("Compilation failed: {}", diagnostics)
            });
            problem
                .test_cases
                .iter()
                .map(|tc| TestExecutionOutput::launch_failure(tc.id, COMPILATION_FAILED))
                .collect()
        };

        let evaluation = evaluator::evaluate(problem, &outputs);
        feedback.extend(build_feedback(
            problem,
            &evaluation.results,
            timeout.as_millis() as u64,
        ));

        if let Err(e) = artifact.close() {
            warn!(error = %e, "Failed to remove artifact directory");
        }

        Ok(GradeReport {
            submission_id: submission.id,
            problem_id: problem.id.clone(),
            score: evaluation.score,
            max_score: evaluation.max_score,
            results: evaluation.results,
            feedback,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn run_test_cases(
        &self,
        artifact: &ExecutionArtifact,
        language: &LanguageConfig,
        problem: &Problem,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Vec<TestExecutionOutput>, GraderError> {
        let mut outputs = Vec::with_capacity(problem.test_cases.len());

        for test_case in &problem.test_cases {
            if cancel.is_cancelled() {
                return Err(GraderError::Cancelled);
            }

            let mut output = self
                .engine
                .run(artifact, language, &test_case.input, timeout, cancel)
                .await?;
            if cancel.is_cancelled() {
                return Err(GraderError::Cancelled);
            }

            output.test_id = test_case.id;
            output.stderr = clean_stderr(artifact, &output.stderr, self.options.stderr_budget);

            if output.timed_out {
                warn!(
                    test_id = test_case.id,
                    execution_ms = output.execution_time_ms,
                    "Execution timed out; test cannot pass"
                );
            } else if output.runtime_error {
                warn!(
                    test_id = test_case.id,
                    execution_ms = output.execution_time_ms,
                    "Execution failed with runtime error; test cannot pass"
                );
            } else {
                debug!(
                    test_id = test_case.id,
                    execution_ms = output.execution_time_ms,
                    "Test case executed"
                );
            }
            outputs.push(output);
        }

        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LanguageConfig, LanguageExecution};
    use crate::engine::CompilationResult;
    use async_trait::async_trait;
    use judgemaster_common::types::{Comparator, Language, SubmissionStatus, TestCase, TestStatus};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Answers each input from a fixed table, records what it was asked.
    struct ScriptedEngine {
        answers: BTreeMap<String, TestExecutionOutput>,
        compile: CompilationResult,
        fail_backend: bool,
        seen_inputs: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        fn new() -> Self {
            Self {
                answers: BTreeMap::new(),
                compile: CompilationResult::success(),
                fail_backend: false,
                seen_inputs: Mutex::new(Vec::new()),
            }
        }

        fn answer(mut self, input: &str, output: TestExecutionOutput) -> Self {
            self.answers.insert(input.to_string(), output);
            self
        }
    }

    #[async_trait]
    impl ExecutionEngine for ScriptedEngine {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn compile(
            &self,
            _artifact: &ExecutionArtifact,
            _language: &LanguageConfig,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<CompilationResult> {
            Ok(self.compile.clone())
        }

        async fn run(
            &self,
            artifact: &ExecutionArtifact,
            _language: &LanguageConfig,
            input: &str,
            _timeout: Duration,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<TestExecutionOutput> {
            if self.fail_backend {
                anyhow::bail!("daemon unreachable at {}", artifact.dir().display());
            }
            self.seen_inputs.lock().unwrap().push(input.to_string());
            Ok(self.answers.get(input).cloned().unwrap_or_default())
        }
    }

    fn stdout(text: &str) -> TestExecutionOutput {
        TestExecutionOutput {
            stdout: text.to_string(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    fn languages() -> LanguageConfigManager {
        LanguageConfigManager::from_configs(vec![LanguageConfig {
            name: Language::Python,
            version: "test".to_string(),
            image: "none".to_string(),
            source_file: "main.py".to_string(),
            execution: LanguageExecution {
                command: "python3".to_string(),
                args: vec!["{source}".to_string()],
                compile: None,
                env: BTreeMap::new(),
            },
            memory_limit_mb: 64,
            cpu_limit: 0.5,
        }])
    }

    fn grader(engine: ScriptedEngine) -> Grader {
        Grader::new(Arc::new(engine), languages(), GraderOptions::default())
    }

    fn factorial() -> Problem {
        let case = |id: u32, input: &str, output: &str, hidden: bool| TestCase {
            id,
            input: input.to_string(),
            expected_output: output.to_string(),
            points: 1,
            hidden,
            description: None,
        };
        Problem {
            id: "factorial".to_string(),
            title: None,
            test_cases: vec![
                case(1, "5", "120", false),
                case(2, "3", "6", false),
                case(3, "10", "3628800", true),
            ],
            time_limit_ms: None,
            comparator: Comparator::Trimmed,
        }
    }

    fn submission(code: &str) -> Submission {
        Submission::new("factorial", Language::Python, code)
    }

    #[tokio::test]
    async fn test_all_cases_pass() {
        let engine = ScriptedEngine::new()
            .answer("5", stdout("120\n"))
            .answer("3", stdout("6\n"))
            .answer("10", stdout("3628800\n"));
        let grader = grader(engine);
        let mut sub = submission("print(...)");

        let report = grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.score, 3);
        assert_eq!(report.max_score, 3);
        assert!(report.feedback.is_empty());
        assert_eq!(sub.status(), SubmissionStatus::Completed);
        assert_eq!(sub.report(), Some(&report));
    }

    #[tokio::test]
    async fn test_cases_run_in_problem_order() {
        let engine = Arc::new(ScriptedEngine::new());
        let grader = Grader::new(engine.clone(), languages(), GraderOptions::default());

        let report = grader
            .grade(&mut submission("x"), &factorial(), &CancellationToken::new())
            .await
            .unwrap();

        let ids: Vec<u32> = report.results.iter().map(|r| r.test_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(*engine.seen_inputs.lock().unwrap(), vec!["5", "3", "10"]);
    }

    #[tokio::test]
    async fn test_empty_source_is_rejected_before_execution() {
        let engine = Arc::new(ScriptedEngine::new());
        let grader = Grader::new(engine.clone(), languages(), GraderOptions::default());
        let mut sub = submission("   \n");

        let err = grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::InvalidSubmission(_)));
        assert!(!err.is_engine_fault());
        assert_eq!(sub.status(), SubmissionStatus::Error);
        assert!(engine.seen_inputs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_source_is_rejected_before_execution() {
        let engine = Arc::new(ScriptedEngine::new());
        let grader = Grader::new(engine.clone(), languages(), GraderOptions::default());
        let mut sub = submission(&"#".repeat(MAX_SOURCE_CODE_BYTES + 1));

        let err = grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::InvalidSubmission(_)));
        assert!(!err.is_engine_fault());
        assert_eq!(sub.status(), SubmissionStatus::Error);
        assert!(engine.seen_inputs.lock().unwrap().is_empty());

        // exactly at the limit is still graded
        let mut sub = submission(&"#".repeat(MAX_SOURCE_CODE_BYTES));
        assert!(grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_submission_for_another_problem_is_rejected() {
        let engine = Arc::new(ScriptedEngine::new());
        let grader = Grader::new(engine.clone(), languages(), GraderOptions::default());
        let mut sub = Submission::new("sum_two", Language::Python, "print(120)");

        let err = grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::InvalidSubmission(ref msg) if msg.contains("sum_two")));
        assert!(!err.is_engine_fault());
        assert!(sub.report().is_none());
        assert!(engine.seen_inputs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_case_input_is_engine_fault() {
        let engine = Arc::new(ScriptedEngine::new());
        let grader = Grader::new(engine.clone(), languages(), GraderOptions::default());
        let mut problem = factorial();
        problem.test_cases[1].input = "9".repeat(MAX_TEST_INPUT_BYTES + 1);
        let mut sub = submission("print(120)");

        let err = grader
            .grade(&mut sub, &problem, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::InvalidProblem(ref msg) if msg.contains("test case 2")));
        assert!(err.is_engine_fault());
        assert_eq!(sub.status(), SubmissionStatus::Error);
        assert!(engine.seen_inputs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_points_overflowing_the_total_are_rejected() {
        let grader = grader(ScriptedEngine::new().answer("5", stdout("120\n")));
        let mut problem = factorial();
        problem.test_cases[0].points = u32::MAX;
        problem.test_cases[1].points = 2;

        let err = grader
            .grade(&mut submission("print(120)"), &problem, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::InvalidProblem(_)));
    }

    #[tokio::test]
    async fn test_unsupported_language() {
        let grader = grader(ScriptedEngine::new());
        let mut sub = Submission::new("factorial", Language::Java, "class Main {}");

        let err = grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::UnsupportedLanguage(Language::Java)));
        assert_eq!(sub.status(), SubmissionStatus::Error);
    }

    #[tokio::test]
    async fn test_problem_without_cases_is_engine_fault() {
        let grader = grader(ScriptedEngine::new());
        let mut problem = factorial();
        problem.test_cases.clear();
        let mut sub = submission("print(1)");

        let err = grader
            .grade(&mut sub, &problem, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::InvalidProblem(_)));
        assert!(err.is_engine_fault());
        assert_eq!(sub.failure_reason(), Some(crate::error::UNAVAILABLE_MESSAGE));
    }

    #[tokio::test]
    async fn test_backend_failure_is_engine_fault_not_zero_score() {
        let mut engine = ScriptedEngine::new();
        engine.fail_backend = true;
        let grader = grader(engine);
        let mut sub = submission("print(120)");

        let err = grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::Backend(_)));
        assert!(sub.report().is_none());
        assert_eq!(sub.status(), SubmissionStatus::Error);
        // internal paths stay in the logs
        assert!(!sub.failure_reason().unwrap().contains("judgemaster-"));
    }

    #[tokio::test]
    async fn test_terminal_submission_is_left_untouched() {
        let grader = grader(ScriptedEngine::new());
        let mut sub = submission("print(120)");
        grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .unwrap();
        let first = sub.report().cloned();

        let err = grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, GraderError::InvalidState(_)));
        assert_eq!(sub.status(), SubmissionStatus::Completed);
        assert_eq!(sub.report().cloned(), first);
    }

    #[tokio::test]
    async fn test_compile_failure_marks_every_case() {
        let mut engine = ScriptedEngine::new();
        engine.compile = CompilationResult::failure("main.cpp:3:5: error: expected ';'");
        let grader = grader(engine);
        let mut sub = submission("int main() { return 0 }");

        let report = grader
            .grade(&mut sub, &factorial(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.score, 0);
        assert!(report
            .results
            .iter()
            .all(|r| r.status == TestStatus::RuntimeError && r.stderr == "compilation failed"));
        assert_eq!(report.feedback[0], "Compilation failed: main.cpp:3:5: error: expected ';'");
        assert_eq!(report.feedback.len(), 1 + 3);
    }

    #[tokio::test]
    async fn test_problem_time_limit_overrides_default() {
        struct LimitRecorder(Mutex<Option<Duration>>);

        #[async_trait]
        impl ExecutionEngine for LimitRecorder {
            fn name(&self) -> &'static str {
                "recorder"
            }
            async fn compile(
                &self,
                _artifact: &ExecutionArtifact,
                _language: &LanguageConfig,
                _cancel: &CancellationToken,
            ) -> anyhow::Result<CompilationResult> {
                Ok(CompilationResult::success())
            }
            async fn run(
                &self,
                _artifact: &ExecutionArtifact,
                _language: &LanguageConfig,
                _input: &str,
                timeout: Duration,
                _cancel: &CancellationToken,
            ) -> anyhow::Result<TestExecutionOutput> {
                *self.0.lock().unwrap() = Some(timeout);
                Ok(TestExecutionOutput::default())
            }
        }

        let recorder = Arc::new(LimitRecorder(Mutex::new(None)));
        let grader = Grader::new(recorder.clone(), languages(), GraderOptions::default());
        let mut problem = factorial();
        problem.time_limit_ms = Some(1234);

        grader
            .grade(&mut submission("x"), &problem, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*recorder.0.lock().unwrap(), Some(Duration::from_millis(1234)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let engine = Arc::new(ScriptedEngine::new());
        let grader = Grader::new(engine.clone(), languages(), GraderOptions::default());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut sub = submission("print(120)");

        let err = grader.grade(&mut sub, &factorial(), &cancel).await.unwrap_err();

        assert!(matches!(err, GraderError::Cancelled));
        assert_eq!(sub.status(), SubmissionStatus::Error);
        assert!(engine.seen_inputs.lock().unwrap().is_empty());
    }
}
