use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use booru_db::DbError;
use booru_types::api::ErrorResponse;
use thiserror::Error;
use tracing::{debug, error};

use crate::ingest::IngestError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("post {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) | ApiError::Db(DbError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Ingest(IngestError::Duplicate(_)) => StatusCode::CONFLICT,
            ApiError::Ingest(IngestError::Malformed(_)) => StatusCode::BAD_REQUEST,
            ApiError::Ingest(IngestError::Body(e)) => e.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() {
            error!("Request failed: {}", self);
            "internal server error".to_string()
        } else {
            debug!("Request rejected ({}): {}", status, self);
            self.to_string()
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
