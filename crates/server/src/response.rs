//! JSON envelopes shared by every route and the mapping from core errors to
//! HTTP status codes.

use axum::{http::StatusCode, Json};
use sarpras_core::errors::{DomainError, InterfaceError};
use sarpras_core::workflow::WorkflowError;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ApiSuccess {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ApiSuccess {
    pub fn new(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into(), status: None, warning: None }
    }
}

pub type ApiRejection = (StatusCode, Json<ApiError>);

pub fn correlation_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

pub fn reject(error: InterfaceError) -> ApiRejection {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::Forbidden { .. } => StatusCode::FORBIDDEN,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!(
            event_name = "http.request.failed",
            correlation_id = error.correlation_id(),
            status = status.as_u16(),
            error = %error,
            "request failed"
        );
    } else {
        warn!(
            event_name = "http.request.rejected",
            correlation_id = error.correlation_id(),
            status = status.as_u16(),
            error = %error,
            "request rejected"
        );
    }

    (status, Json(ApiError { error: error.user_message().to_string() }))
}

/// Input that failed validation before reaching the workflow.
pub fn invalid(error: DomainError, correlation_id: &str) -> ApiRejection {
    reject(WorkflowError::Domain(error).into_interface(correlation_id))
}

pub fn malformed_body(detail: impl std::fmt::Display, correlation_id: &str) -> ApiRejection {
    reject(InterfaceError::BadRequest {
        message: format!("Format permintaan tidak valid: {detail}"),
        correlation_id: correlation_id.to_string(),
    })
}

pub fn internal(detail: impl std::fmt::Display, correlation_id: &str) -> ApiRejection {
    error!(
        event_name = "http.request.storage_error",
        correlation_id,
        error = %detail,
        "storage lookup failed"
    );
    reject(InterfaceError::Internal {
        message: "Terjadi kesalahan internal".to_string(),
        correlation_id: correlation_id.to_string(),
    })
}

/// Reads a required string field, trimming whitespace.
pub fn required<'a>(
    value: Option<&'a str>,
    field: &'static str,
    correlation_id: &str,
) -> Result<&'a str, ApiRejection> {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(invalid(DomainError::MissingField(field), correlation_id)),
    }
}
