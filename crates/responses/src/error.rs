use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

pub type ResponseResult<T> = std::result::Result<T, ResponseError>;

/// Orchestration errors with appropriate HTTP status codes.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// Malformed input, unsupported input variant or missing credential.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed at the upstream (missing or invalid API key).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Unknown response, file or vector store id.
    #[error("{0}")]
    NotFound(String),

    /// The cumulative function-call count exceeded the configured limit.
    #[error("Too many tool calls. The maximum allowed is {limit}.")]
    TooManyToolCalls {
        /// Configured maximum.
        limit: usize,
    },

    /// The streaming deadline expired.
    #[error("The request exceeded the maximum allowed streaming duration")]
    Timeout,

    /// Upstream rate limit, forwarded as-is.
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// Provider API returned an error.
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError { status: u16, message: String },

    /// Network or connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Internal server error.
    /// If Some(message), it came from a provider and can be shown.
    /// If None, it's an internal error and should not leak details.
    #[error("Internal server error")]
    InternalError(Option<String>),
}

impl ResponseError {
    /// Get the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::TooManyToolCalls { .. } => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ConnectionError(_) => StatusCode::BAD_GATEWAY,
            Self::ProviderApiError { status, .. } => match *status {
                400 => StatusCode::BAD_REQUEST,
                401 => StatusCode::UNAUTHORIZED,
                403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                429 => StatusCode::TOO_MANY_REQUESTS,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type string for the response body.
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) | Self::TooManyToolCalls { .. } => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::NotFound(_) => "not_found_error",
            Self::RateLimitExceeded { .. } => "rate_limit_error",
            Self::Timeout => "timeout_error",
            Self::ConnectionError(_) | Self::ProviderApiError { .. } => "api_error",
            Self::InternalError(_) => "internal_error",
        }
    }

    /// Short machine-readable code carried by terminal `response.error` events.
    pub fn stream_code(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::TooManyToolCalls { .. } => "too_many_tool_calls",
            Self::InvalidRequest(_) => "invalid_request",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::NotFound(_) => "not_found",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::ProviderApiError { .. } | Self::ConnectionError(_) => "upstream_error",
            Self::InternalError(_) => "server_error",
        }
    }

    /// Message that is safe to expose to API consumers.
    pub fn client_message(&self) -> String {
        match self {
            Self::InternalError(Some(provider_msg)) => provider_msg.clone(),
            Self::InternalError(None) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Error response format compatible with the OpenAI API.
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

impl IntoResponse for ResponseError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.client_message();

        let error_response = ErrorResponse {
            error: ErrorDetails {
                message,
                r#type: self.error_type().to_string(),
                code: status.as_u16(),
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<vector_search::SearchError> for ResponseError {
    fn from(error: vector_search::SearchError) -> Self {
        match error {
            vector_search::SearchError::NotFound(message) => Self::NotFound(message),
            vector_search::SearchError::InvalidRequest(message) => Self::InvalidRequest(message),
            other => Self::InternalError(Some(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(
            ResponseError::InvalidRequest("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ResponseError::TooManyToolCalls { limit: 25 }.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ResponseError::NotFound("resp_x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ResponseError::ProviderApiError {
                status: 503,
                message: "overloaded".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn stream_codes() {
        assert_eq!(ResponseError::Timeout.stream_code(), "timeout");
        assert_eq!(
            ResponseError::TooManyToolCalls { limit: 2 }.stream_code(),
            "too_many_tool_calls"
        );
    }

    #[test]
    fn internal_error_does_not_leak() {
        assert_eq!(ResponseError::InternalError(None).client_message(), "Internal server error");
        assert_eq!(
            ResponseError::InternalError(Some("quota".into())).client_message(),
            "quota"
        );
    }
}
