//! Error types for the HTTP long-poll surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hivelink_core::{
    directory::DirectoryError, error::WaitError, store::StoreError, CommandId, DeviceId,
};
use thiserror::Error;

/// A server-side request failure, rendered as a JSON error body.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request referenced an unknown (or invisible) device.
    #[error("device {0} not found")]
    DeviceNotFound(DeviceId),

    /// The request referenced an unknown command.
    #[error("command {command} not found for device {device}")]
    CommandNotFound {
        /// The device named in the request.
        device: DeviceId,
        /// The command id named in the request.
        command: CommandId,
    },

    /// The request was malformed.
    #[error("{0}")]
    BadRequest(String),

    /// A backend collaborator failed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<WaitError> for ApiError {
    fn from(err: WaitError) -> Self {
        match err {
            WaitError::DeviceNotFound(id) => Self::DeviceNotFound(id),
            WaitError::CommandNotFound { device, command } => {
                Self::CommandNotFound { device, command }
            }
            WaitError::Store(e) => e.into(),
            WaitError::Directory(e) => e.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DeviceNotFound(id) => Self::DeviceNotFound(id),
            StoreError::CommandNotFound(command) => Self::Internal(format!(
                "store lost track of command {command}"
            )),
            StoreError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::DeviceNotFound(id) => Self::DeviceNotFound(id),
            DirectoryError::Backend(msg) => Self::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::DeviceNotFound(_) | Self::CommandNotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// A client-side request failure.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The HTTP request itself failed.
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// The base URL could not be extended with the endpoint path.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The server answered 404 for the device or command.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server rejected the request as malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The server answered with an unexpected status.
    #[error("unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code.
        status: u16,
        /// Error message from the server, if any.
        message: String,
    },
}

/// Failure to create a client-side subscription.
#[derive(Debug, Clone, Copy, Error)]
pub enum SubscribeError {
    /// The manager is shutting down and accepts no new subscriptions.
    #[error("subscription manager is shutting down")]
    ShuttingDown,

    /// All worker slots are occupied.
    #[error("subscription pool exhausted")]
    PoolExhausted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_statuses() {
        assert_eq!(
            ApiError::DeviceNotFound(DeviceId::new("dev1"))
                .into_response()
                .status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("nope".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal("boom".into()).into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn wait_error_maps_to_not_found() {
        let err: ApiError = WaitError::DeviceNotFound(DeviceId::new("dev1")).into();
        assert!(matches!(err, ApiError::DeviceNotFound(_)));
    }
}
