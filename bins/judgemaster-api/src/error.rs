//! API error responses.
//!
//! Engine faults always render as the same generic 503 body; their details
//! only reach the logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use judgemaster_grader::GraderError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Grader(#[from] GraderError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Grader(e) => match e {
                GraderError::InvalidSubmission(_) | GraderError::UnsupportedLanguage(_) => {
                    StatusCode::BAD_REQUEST
                }
                GraderError::InvalidState(_) => StatusCode::CONFLICT,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            },
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Grader(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Grader(e) => e.user_message(),
        };

        let body = ErrorBody {
            error: message,
            code: self.error_code(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use judgemaster_common::types::Language;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(GraderError::InvalidSubmission("empty".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(GraderError::UnsupportedLanguage(Language::Cpp)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(GraderError::ProblemNotFound("x".into())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(GraderError::Cancelled).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
