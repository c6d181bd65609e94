use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-wide error types
#[derive(Error, Debug)]
pub enum LinkGateError {
    #[error("Configuration error: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Invalid condition: field '{field}' does not support operator '{operator}'")]
    InvalidCondition { field: String, operator: String },

    #[error("Invalid condition value for field '{field}': expected {expected}")]
    InvalidConditionValue { field: String, expected: String },

    #[error("Invalid action settings for '{action}': {reason}")]
    InvalidActionSettings { action: String, reason: String },

    #[error("Failed to fetch rules for link '{link}': {reason}")]
    RuleFetch { link: String, reason: String },

    #[error("Webhook dispatch failed: {0}")]
    WebhookDispatch(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LinkGateError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LinkGateError::InvalidCondition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LinkGateError::InvalidConditionValue { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LinkGateError::InvalidActionSettings { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            LinkGateError::RuleFetch { .. } => StatusCode::BAD_GATEWAY,
            LinkGateError::WebhookDispatch(_) => StatusCode::BAD_GATEWAY,
            LinkGateError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LinkGateError::NotFound(_) => StatusCode::NOT_FOUND,
            LinkGateError::BadRequest(_) => StatusCode::BAD_REQUEST,
            LinkGateError::Json(_) => StatusCode::BAD_REQUEST,
            LinkGateError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LinkGateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LinkGateError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            LinkGateError::InvalidCondition { .. } => "INVALID_CONDITION",
            LinkGateError::InvalidConditionValue { .. } => "INVALID_CONDITION_VALUE",
            LinkGateError::InvalidActionSettings { .. } => "INVALID_ACTION_SETTINGS",
            LinkGateError::RuleFetch { .. } => "RULE_FETCH_FAILED",
            LinkGateError::WebhookDispatch(_) => "WEBHOOK_DISPATCH_FAILED",
            LinkGateError::Validation(_) => "VALIDATION_FAILED",
            LinkGateError::NotFound(_) => "NOT_FOUND",
            LinkGateError::BadRequest(_) => "BAD_REQUEST",
            LinkGateError::Json(_) => "JSON_ERROR",
            LinkGateError::Config(_) => "CONFIG_ERROR",
            LinkGateError::Internal(_) => "INTERNAL_ERROR",
            LinkGateError::Io(_) => "IO_ERROR",
        }
    }
}

impl IntoResponse for LinkGateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
                "status": status.as_u16()
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, LinkGateError>;
