use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use platform_gate::GateError;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::error;

/// Shared handler result type.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error, Clone)]
pub enum ApiError {
    #[error(transparent)]
    Gate(Arc<GateError>),
    #[error("bad request: {0}")]
    InvalidInput(String),
    #[error("internal server error")]
    Internal(Arc<anyhow::Error>),
}

impl ApiError {
    pub fn internal(err: anyhow::Error) -> Self {
        Self::Internal(Arc::new(err))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Gate(err) => {
                StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Gate(err) => err.code(),
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::Internal(_) => "internal",
        }
    }

    /// `{ "code", "message", ...details }`. Internal causes stay in the log.
    pub fn body(&self) -> Value {
        let mut body = Map::new();
        body.insert("code".into(), self.code().into());
        let message = match self {
            ApiError::Gate(err) if err.status() >= 500 => "service unavailable".to_string(),
            ApiError::Gate(err) => err.to_string(),
            ApiError::InvalidInput(_) => self.to_string(),
            ApiError::Internal(_) => "internal server error".to_string(),
        };
        body.insert("message".into(), message.into());
        if let ApiError::Gate(err) = self {
            if let Some(Value::Object(details)) = err.details() {
                body.extend(details);
            }
        }
        Value::Object(body)
    }
}

impl From<GateError> for ApiError {
    fn from(value: GateError) -> Self {
        Self::Gate(Arc::new(value))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            match &self {
                ApiError::Internal(err) => error!(error = ?err, "request failed"),
                other => error!(error = %other, "request failed"),
            }
        }
        (status, Json(self.body())).into_response()
    }
}
