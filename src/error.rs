use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScoreError {
    /// The submission is malformed; `field` names the offending input.
    #[error("{message}")]
    InvalidInput {
        field: &'static str,
        message: &'static str,
    },
    #[error("score store failure: {0}")]
    Persistence(#[from] sqlx::Error),
}

impl ScoreError {
    pub fn invalid(field: &'static str, message: &'static str) -> Self {
        Self::InvalidInput { field, message }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room '{room_id}' is full ({capacity} peers)")]
    Full { room_id: String, capacity: usize },
}

/// Reasons an inbound WebSocket frame is dropped without a reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("frame is not a JSON object")]
    MalformedJson,
    #[error("frame has no string `type` field")]
    MissingType,
    #[error("unknown message type '{0}'")]
    UnknownType(String),
    #[error("invalid field '{0}'")]
    InvalidField(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be at least 1")]
    MustBePositive(&'static str),
}

/// Terminal mapping of every HTTP failure to a JSON body.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Content-Type must be application/json")]
    UnsupportedMediaType,
    #[error("Invalid JSON")]
    InvalidJson,
    /// The body could not be buffered, e.g. it exceeds the size limit.
    #[error("{message}")]
    UnreadableBody { status: StatusCode, message: String },
    #[error("{0}")]
    InvalidInput(&'static str),
    #[error("API route not found")]
    NotFound,
    #[error("Server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::UnreadableBody { status, .. } => *status,
            Self::InvalidJson | Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ScoreError> for ApiError {
    fn from(error: ScoreError) -> Self {
        match error {
            ScoreError::InvalidInput { message, .. } => Self::InvalidInput(message),
            ScoreError::Persistence(source) => {
                tracing::error!(error = %source, "score store failure");
                Self::Internal
            }
        }
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        Self::UnreadableBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_bad_request() {
        let api: ApiError = ScoreError::invalid("name", "Invalid name length").into();
        assert_eq!(api.status(), StatusCode::BAD_REQUEST);
        assert_eq!(api.to_string(), "Invalid name length");
    }

    #[test]
    fn persistence_errors_never_leak_details() {
        let api: ApiError = ScoreError::Persistence(sqlx::Error::PoolClosed).into();
        assert_eq!(api.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.to_string(), "Server error");
    }
}
