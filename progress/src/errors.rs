use crate::store::StoreError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Errors surfaced to API clients.
#[derive(thiserror::Error, Debug)]
pub enum ProgressError {
    #[error("Project '{project}' does not exist")]
    NonexistentProject { project: String },

    #[error("Version '{version}' for project '{project}' does not exist")]
    NonexistentVersion { project: String, version: String },

    #[error("Category '{category}' does not exist for project '{project}', version '{version}'")]
    NonexistentCategory {
        project: String,
        version: String,
        category: String,
    },

    #[error("No data exists for project '{project}', version '{version}', and category '{category}'")]
    EmptyCategory {
        project: String,
        version: String,
        category: String,
    },

    #[error("{0}")]
    InvalidData(String),

    #[error("No API key provided")]
    MissingApiKey,

    #[error("Incorrect API key provided")]
    InvalidApiKey,

    #[error("{0}")]
    AlreadyExists(String),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProgressError {
    pub fn invalid_data(message: impl Into<String>) -> Self {
        ProgressError::InvalidData(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ProgressError::NonexistentProject { .. }
            | ProgressError::NonexistentVersion { .. }
            | ProgressError::NonexistentCategory { .. }
            | ProgressError::EmptyCategory { .. } => StatusCode::NOT_FOUND,
            ProgressError::InvalidData(_) | ProgressError::AlreadyExists(_) => {
                StatusCode::BAD_REQUEST
            }
            ProgressError::MissingApiKey | ProgressError::InvalidApiKey => StatusCode::FORBIDDEN,
            ProgressError::Store(_) | ProgressError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error_message: String,
}

impl IntoResponse for ProgressError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(ApiErrorResponse {
            error_message: self.to_string(),
        });

        (status, body).into_response()
    }
}
