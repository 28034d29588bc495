use crate::services::download_gate::GateError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for request errors that keeps the message local.
///
/// Messages are meant for the caller and never carry collaborator detail.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }

    /// Shortcut for 404 Not Found
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not found")
    }

    /// Shortcut for 405 Method Not Allowed
    pub fn method_not_allowed() -> Self {
        Self::new(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

/// Gate outcomes to HTTP statuses. Collaborator failures were already logged
/// by the gate and collapse to a bare 500.
impl From<GateError> for AppError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::InvalidInput(reason) => {
                AppError::new(StatusCode::BAD_REQUEST, format!("bad request: {reason}"))
            }
            GateError::AlreadyGranted(_) => AppError::new(StatusCode::FORBIDDEN, "forbidden"),
            GateError::ObjectMissing(_) => AppError::not_found(),
            GateError::RecordStore { .. } | GateError::ObjectStore { .. } => AppError::internal(),
            GateError::Delivery { .. } => AppError::new(StatusCode::BAD_GATEWAY, "bad gateway"),
        }
    }
}
