use crate::common::Request;
use crate::exception::HttpException;
use async_trait::async_trait;
use axum::http::StatusCode;
use std::sync::Arc;

/// `Ok(())` lets the request through, an error denies it.
pub type GuardResult = Result<(), GuardError>;

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl From<GuardError> for HttpException {
    fn from(error: GuardError) -> Self {
        match error {
            GuardError::Forbidden(message) => HttpException::new(StatusCode::FORBIDDEN, message),
            GuardError::Unauthorized(message) => HttpException::new(StatusCode::UNAUTHORIZED, message),
        }
    }
}

/// Decides whether a matched request may reach its handler.
///
/// Guards run after middleware, in order: global, controller, route.
#[async_trait]
pub trait Guard: Send + Sync + 'static {
    async fn can_activate(&self, request: &Request) -> GuardResult;
}

/// A guard built from a synchronous predicate.
pub struct FnGuard<F> {
    reason: String,
    predicate: F,
}

impl<F> FnGuard<F>
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    pub fn new(reason: impl Into<String>, predicate: F) -> Self {
        Self {
            reason: reason.into(),
            predicate,
        }
    }
}

#[async_trait]
impl<F> Guard for FnGuard<F>
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    async fn can_activate(&self, request: &Request) -> GuardResult {
        if (self.predicate)(request) {
            Ok(())
        } else {
            Err(GuardError::Forbidden(self.reason.clone()))
        }
    }
}

/// Shorthand for an `Arc<dyn Guard>` from a predicate.
pub fn guard_fn<F>(reason: impl Into<String>, predicate: F) -> Arc<dyn Guard>
where
    F: Fn(&Request) -> bool + Send + Sync + 'static,
{
    Arc::new(FnGuard::new(reason, predicate))
}

/// Run `guards` in order and stop at the first denial.
pub(crate) async fn check_all(
    guards: &[&Arc<dyn Guard>],
    request: &Request,
) -> GuardResult {
    for guard in guards {
        guard.can_activate(request).await?;
    }
    Ok(())
}
