//! Feathers-style HTTP errors: `{ name, message, code, className }`.

use std::fmt;

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use trade_queue::QueueError;

use crate::trades::TradeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    NotFound,
    GeneralError,
    Unavailable,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::BadRequest => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::GeneralError => 500,
            ErrorKind::Unavailable => 503,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "BadRequest",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::GeneralError => "GeneralError",
            ErrorKind::Unavailable => "Unavailable",
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "bad-request",
            ErrorKind::NotFound => "not-found",
            ErrorKind::GeneralError => "general-error",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

#[derive(Debug)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub errors: Option<Value>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), errors: None }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, msg)
    }
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }
    pub fn general_error(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::GeneralError, msg)
    }
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, msg)
    }

    pub fn with_errors(mut self, errors: Value) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn to_json(&self) -> Value {
        let mut base = json!({
            "name": self.kind.name(),
            "message": self.message,
            "code": self.kind.status_code(),
            "className": self.kind.class_name(),
        });
        if let Some(errors) = &self.errors {
            base["errors"] = errors.clone();
        }
        base
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.kind.name(), self.kind.status_code(), self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        if let Some(app) = err.chain().find_map(|e| e.downcast_ref::<AppError>()) {
            return Self { kind: app.kind, message: app.message.clone(), errors: app.errors.clone() };
        }
        Self::general_error(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Broker(_) | QueueError::QueueClosed(_) => Self::unavailable(err.to_string()),
            other => Self::general_error(other.to_string()),
        }
    }
}

impl From<TradeError> for AppError {
    fn from(err: TradeError) -> Self {
        Self::bad_request(err.to_string())
    }
}

pub fn map_json_rejection(rejection: JsonRejection) -> AppError {
    AppError::bad_request("Failed to parse the request body as JSON")
        .with_errors(json!({ "_schema": [rejection.to_string()] }))
}

pub fn map_path_rejection(rejection: PathRejection) -> AppError {
    AppError::bad_request(format!("Invalid path parameter: {rejection}"))
}
