//! The single error taxonomy for the entity store, its routing layer, and
//! the HTTP boundary that sits on top of them.
//!
//! Every fallible operation in this crate returns [`StoreError`]. The
//! boundary inspects [`StoreError::kind`] to pick an HTTP status and a
//! machine-readable code; display text stays separate so wrapping an
//! error with context never changes how it gets mapped.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    /// Carries the discharge-required challenge body for the macaroon path.
    #[error("unauthorized: discharge required")]
    DischargeRequired(serde_json::Value),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("duplicate upload: {0}")]
    DuplicateUpload(String),

    /// Internal sentinel: a metadata handler does not apply to this
    /// entity kind. Never sent to a client directly -- the routing layer
    /// translates it to `NotFound` (single name) or omits it (`any`).
    #[error("metadata not relevant: {0}")]
    MetadataNotRelevant(String),

    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("{0}")]
    Internal(String),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::BadRequest(_) => "bad-request",
            StoreError::Unauthorized | StoreError::DischargeRequired(_) => "unauthorized",
            StoreError::Forbidden(_) => "forbidden",
            StoreError::NotFound(_) => "not-found",
            StoreError::DuplicateUpload(_) => "duplicate-upload",
            StoreError::MetadataNotRelevant(_) => "metadata-not-relevant",
            StoreError::MethodNotAllowed(_) => "method-not-allowed",
            StoreError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            StoreError::Unauthorized | StoreError::DischargeRequired(_) => {
                StatusCode::UNAUTHORIZED
            }
            StoreError::Forbidden(_) => StatusCode::FORBIDDEN,
            StoreError::NotFound(_) | StoreError::MetadataNotRelevant(_) => StatusCode::NOT_FOUND,
            StoreError::DuplicateUpload(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            StoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        StoreError::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        StoreError::BadRequest(msg.into())
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Internal(format!("io error: {err}"))
    }
}

impl From<zip::result::ZipError> for StoreError {
    fn from(err: zip::result::ZipError) -> Self {
        StoreError::BadRequest(format!("invalid archive: {err}"))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::BadRequest(format!("invalid json: {err}"))
    }
}

impl From<serde_yaml::Error> for StoreError {
    fn from(err: serde_yaml::Error) -> Self {
        StoreError::BadRequest(format!("invalid yaml: {err}"))
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Internal(format!("identity discharge request failed: {err}"))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Code")]
    code: String,
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        if let StoreError::DischargeRequired(body) = &self {
            return (StatusCode::UNAUTHORIZED, Json(body.clone())).into_response();
        }
        let status = self.status();
        let body = ErrorBody {
            message: self.to_string(),
            code: self.kind().to_string(),
        };
        (status, Json(body)).into_response()
    }
}
