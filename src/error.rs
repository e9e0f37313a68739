use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::area::ValidationError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("status: {0}")]
    Status(StatusCode),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("http client setup failed: {0}")]
    HttpClient(#[from] reqwest::Error),
    #[error("telemetry setup failed: {0}")]
    Telemetry(#[from] opentelemetry_otlp::ExporterBuildError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Status(code) => code.into_response(),
            // Validation errors go back verbatim, naming the violated rule.
            AppError::Validation(err) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(err)).into_response()
            }
            AppError::Serialization(_) | AppError::HttpClient(_) | AppError::Telemetry(_) => {
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}
