// CLI commands for grading and inspecting problems
use anyhow::{bail, Context, Result};
use judgemaster_common::config::Settings;
use judgemaster_common::types::{Comparator, Language, Problem, Submission, TestStatus};
use judgemaster_grader::{Grader, ProblemStore};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Guess the language from a source file extension
fn infer_language(source: &Path) -> Option<Language> {
    match source.extension()?.to_str()? {
        "py" => Some(Language::Python),
        "js" | "mjs" => Some(Language::JavaScript),
        "cpp" | "cc" | "cxx" => Some(Language::Cpp),
        "java" => Some(Language::Java),
        _ => None,
    }
}

/// A problem argument is either a path to a .json file or an id in the
/// configured problems directory.
async fn resolve_problem(problem: &str, settings: &Settings) -> Result<Problem> {
    let as_path = Path::new(problem);
    let result = if as_path.extension().is_some_and(|e| e == "json") || as_path.is_file() {
        ProblemStore::load_file(as_path).await
    } else {
        ProblemStore::new(&settings.problems_dir)
            .get(problem)
            .await
            .map(|p| p.as_ref().clone())
    };
    result.with_context(|| format!("Failed to load problem '{}'", problem))
}

fn describe_comparator(comparator: &Comparator) -> String {
    match comparator {
        Comparator::Trimmed => "trimmed".to_string(),
        Comparator::Exact => "exact".to_string(),
        Comparator::IgnoreTrailingWhitespace => "ignore trailing whitespace".to_string(),
        Comparator::Numeric { tolerance } => format!("numeric (tolerance {})", tolerance),
    }
}

fn status_icon(status: TestStatus) -> &'static str {
    match status {
        TestStatus::Passed => "✅",
        TestStatus::Failed => "❌",
        TestStatus::RuntimeError => "💥",
        TestStatus::Timeout => "⏱️",
    }
}

/// Grade a source file against a problem
pub async fn grade(
    problem: &str,
    source: &Path,
    language: Option<Language>,
    json: bool,
) -> Result<()> {
    let settings = Settings::from_env()?;
    let problem = resolve_problem(problem, &settings).await?;

    let code = tokio::fs::read_to_string(source)
        .await
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let language = language
        .or_else(|| infer_language(source))
        .unwrap_or(Language::Python);

    let grader = Grader::from_settings(&settings).context("Failed to initialise grader")?;
    if !grader.languages().is_supported(&language) {
        bail!(
            "Language '{}' is not configured. Available: {:?}",
            language,
            grader.languages().list_languages()
        );
    }

    if !json {
        println!(
            "🚀 Grading {} ({}) against '{}' [{} test cases, {} backend]",
            source.display(),
            language,
            problem.id,
            problem.test_cases.len(),
            grader.engine_name()
        );
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let mut submission = Submission::new(problem.id.clone(), language, code);
    let report = grader
        .grade(&mut submission, &problem, &cancel)
        .await
        .context("Grading failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!();
    for result in &report.results {
        let label = if result.hidden { " (hidden)" } else { "" };
        println!(
            "  {} Test {}{}: {} [{} ms, {} pts]",
            status_icon(result.status),
            result.test_id,
            label,
            result.status,
            result.execution_time_ms,
            result.points_earned
        );
    }

    if !report.feedback.is_empty() {
        println!();
        println!("📋 Feedback:");
        for line in &report.feedback {
            println!("  {}", line);
        }
    }

    println!();
    if report.all_passed() {
        println!("🎉 Score: {}/{} - all tests passed", report.score, report.max_score);
    } else {
        println!("📊 Score: {}/{}", report.score, report.max_score);
    }

    Ok(())
}

/// Validate a problem definition and print a summary
pub async fn check_problem(file: &Path) -> Result<()> {
    println!("🔍 Checking problem: {}", file.display());

    let problem = ProblemStore::load_file(file)
        .await
        .with_context(|| format!("Problem definition {} is invalid", file.display()))?;

    let hidden = problem.test_cases.iter().filter(|tc| tc.hidden).count();
    println!("✓ Problem id: {}", problem.id);
    if let Some(title) = &problem.title {
        println!("  Title: {}", title);
    }
    println!(
        "  Test cases: {} ({} visible, {} hidden)",
        problem.test_cases.len(),
        problem.test_cases.len() - hidden,
        hidden
    );
    println!("  Total points: {}", problem.total_points());
    match problem.time_limit_ms {
        Some(ms) => println!("  Time limit: {} ms", ms),
        None => println!("  Time limit: engine default"),
    }
    println!("  Comparator: {}", describe_comparator(&problem.comparator));
    println!();
    println!("🎉 Problem definition is valid");

    Ok(())
}

/// Print the language table in effect
pub fn list_languages() -> Result<()> {
    let settings = Settings::from_env()?;
    let grader = Grader::from_settings(&settings).context("Failed to initialise grader")?;

    println!("📚 Configured languages ({} backend):", grader.engine_name());
    println!();
    for language in grader.languages().list_languages() {
        let Some(config) = grader.languages().get_config(&language) else {
            continue;
        };
        let mut run = vec![config.execution.command.clone()];
        run.extend(config.execution.args.iter().cloned());
        println!("  {} (version {})", language, config.version);
        println!("    Source file: {}", config.source_file);
        if let Some(step) = &config.execution.compile {
            let mut compile = vec![step.command.clone()];
            compile.extend(step.args.iter().cloned());
            println!("    Compile: {}", compile.join(" "));
        }
        println!("    Run: {}", run.join(" "));
        println!(
            "    Image: {} ({} MB, {} CPU)",
            config.image, config.memory_limit_mb, config.cpu_limit
        );
    }

    Ok(())
}
