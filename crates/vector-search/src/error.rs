use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Vector store and retrieval errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Unknown vector store or file id.
    #[error("{0}")]
    NotFound(String),

    /// Malformed search or store request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The embeddings endpoint failed.
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The vector or lexical index rejected an operation.
    #[error("Index error: {0}")]
    Index(String),

    /// Blob or sidecar I/O failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error that should not leak details.
    #[error("Internal server error")]
    Internal,
}

impl SearchError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Embedding(_) | Self::Index(_) | Self::Storage(_) => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string for the response body.
    pub fn error_type(&self) -> &str {
        match self {
            Self::NotFound(_) => "not_found_error",
            Self::InvalidRequest(_) => "invalid_request_error",
            Self::Embedding(_) | Self::Index(_) | Self::Storage(_) => "api_error",
            Self::Internal => "internal_error",
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    r#type: String,
    code: u16,
}

impl IntoResponse for SearchError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message: self.to_string(),
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}
