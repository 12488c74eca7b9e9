use super::{ArgumentsHost, ExceptionFilter};
use crate::error::HandlerError;
use axum::http::StatusCode;
use serde_json::json;
use tracing::error;

/// A request-time error that carries its own status code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{status}: {message}")]
pub struct HttpException {
    status: StatusCode,
    message: String,
}

impl HttpException {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The filter of last resort. It accepts everything.
///
/// An [`HttpException`] keeps its status and message; any other error
/// becomes a 500 whose message does not leak the error text.
#[derive(Default)]
pub struct HttpExceptionFilter;

impl ExceptionFilter for HttpExceptionFilter {
    fn catch(&self, error: &HandlerError, host: &mut ArgumentsHost<'_>) {
        let (status, message) = match error.downcast_ref::<HttpException>() {
            Some(exception) => (exception.status(), exception.message().to_string()),
            None => {
                error!(
                    method = %host.request.method(),
                    path = %host.request.path(),
                    error = %error,
                    "Unhandled error while serving request"
                );
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        host.response.status(status).json(&json!({
            "statusCode": status.as_u16(),
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
    }
}
