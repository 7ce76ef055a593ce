// HTTP route handlers for the JudgeMaster API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use judgemaster_common::types::{GradeResponse, Language, Submission, TestStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::ApiError;
use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct GradeRequest {
    pub problem_id: String,
    pub code: String,
    #[serde(default = "default_language")]
    pub language: Language,
    #[serde(default)]
    pub user_id: Option<String>,
}

fn default_language() -> Language {
    Language::Python
}

/// Per-test summary; only visible cases are listed
#[derive(Debug, Serialize)]
pub struct VisibleResult {
    pub test_id: u32,
    pub status: TestStatus,
    pub points_earned: u32,
    pub execution_time_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct GradeResponseBody {
    pub submission_id: Uuid,
    #[serde(flatten)]
    pub grade: GradeResponse,
    pub results: Vec<VisibleResult>,
}

/// POST /grade - Grade a submission synchronously
pub async fn grade_submission(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GradeRequest>, JsonRejection>,
) -> Result<Json<GradeResponseBody>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let problem = match state.problems.get(&request.problem_id).await {
        Ok(problem) => problem,
        Err(e) => {
            metrics::GRADINGS_TOTAL.with_label_values(&[e.code()]).inc();
            return Err(e.into());
        }
    };

    let _permit = state
        .permits
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| judgemaster_grader::GraderError::Cancelled)?;
    let _active = metrics::ActiveGrading::start();

    let mut submission = Submission::new(request.problem_id, request.language, request.code);
    if let Some(user_id) = request.user_id {
        submission = submission.with_user(user_id);
    }
    info!(
        submission_id = %submission.id,
        problem_id = %problem.id,
        language = %submission.language,
        "Submission received"
    );

    let cancel = state.shutdown.child_token();
    let start = Instant::now();
    let result = state.grader.grade(&mut submission, &problem, &cancel).await;
    metrics::GRADING_DURATION
        .with_label_values(&[submission.language.as_str()])
        .observe(start.elapsed().as_secs_f64());

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            metrics::GRADINGS_TOTAL.with_label_values(&[e.code()]).inc();
            return Err(e.into());
        }
    };

    metrics::GRADINGS_TOTAL.with_label_values(&["completed"]).inc();
    for r in &report.results {
        metrics::TEST_VERDICTS_TOTAL
            .with_label_values(&[r.status.as_str()])
            .inc();
    }

    let results = report
        .results
        .iter()
        .filter(|r| !r.hidden)
        .map(|r| VisibleResult {
            test_id: r.test_id,
            status: r.status,
            points_earned: r.points_earned,
            execution_time_ms: r.execution_time_ms,
        })
        .collect();

    Ok(Json(GradeResponseBody {
        submission_id: submission.id,
        grade: report.to_response(),
        results,
    }))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /languages - Languages this deployment accepts
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "languages": state.grader.languages().list_languages(),
        "backend": state.grader.engine_name(),
    }))
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics() -> impl IntoResponse {
    match metrics::gather() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
