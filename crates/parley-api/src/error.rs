use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error};

use parley_messaging::{ErrorKind, MessagingError};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Messaging(#[from] MessagingError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Messaging(e) => match e.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Authorization => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Delivery | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // internal details stay in the log
        let message = if status.is_server_error() {
            error!("request failed: {}", self);
            "internal server error".to_string()
        } else {
            debug!(%status, "request rejected: {}", self);
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Run blocking store work off the async runtime.
pub async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> parley_messaging::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Join(e)
        })?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn error_kinds_map_to_status_codes() {
        let cases = [
            (MessagingError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (MessagingError::NotAllowed("x".into()), StatusCode::FORBIDDEN),
            (MessagingError::PostNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (
                MessagingError::Store(anyhow::anyhow!("disk full")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
