// src/error.rs
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failures surfaced to the caller. Everything a handler returns goes through here.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Failed to reach the assistant backend. Last error: {0}")]
    UpstreamUnavailable(String),

    #[error("Empty response from the assistant backend")]
    EmptyUpstreamResponse,

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: bool,
    pub message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationRequired => StatusCode::UNAUTHORIZED,
            AppError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::EmptyUpstreamResponse | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message placed in the response body. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }

        let body = ErrorBody {
            error: true,
            message: self.public_message(),
        };
        (status, Json(body)).into_response()
    }
}

/// Outcome of a single failed upstream attempt.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Timeout after {0} ms")]
    Timeout(u128),

    #[error("{message}")]
    Status { status: u16, message: String },

    /// The client-facing text never includes the upstream URL; `Debug` keeps the full error.
    #[error("{}", transport_reason(.0))]
    Transport(#[from] reqwest::Error),
}

fn transport_reason(err: &reqwest::Error) -> &'static str {
    if err.is_timeout() {
        "Upstream request timed out"
    } else if err.is_connect() {
        "Could not connect to upstream"
    } else if err.is_body() || err.is_decode() {
        "Failed to read upstream response"
    } else {
        "Upstream request failed"
    }
}

impl UpstreamError {
    /// 404 means the endpoint is absent rather than flaky; retrying it is pointless.
    pub fn is_not_found(&self) -> bool {
        matches!(self, UpstreamError::Status { status: 404, .. })
    }
}
