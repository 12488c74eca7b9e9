//! Request-time error handling.
//!
//! Errors raised by middleware, guards or handlers are offered to the route's
//! filters, then the controller's, then the global ones. The first filter
//! whose [`accepts`](ExceptionFilter::accepts) returns true handles the error.
//! When none does, [`HttpExceptionFilter`] produces a generic response.

use crate::common::{Request, Response};
use crate::error::HandlerError;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

pub mod http;

pub use http::{HttpException, HttpExceptionFilter};

/// What a filter can see and write while handling an error.
pub struct ArgumentsHost<'a> {
    pub request: &'a Request,
    pub response: &'a mut Response,
}

impl<'a> ArgumentsHost<'a> {
    pub fn new(request: &'a Request, response: &'a mut Response) -> Self {
        Self { request, response }
    }
}

/// Handles errors raised while serving a request.
pub trait ExceptionFilter: Send + Sync + 'static {
    /// Whether this filter handles `error`. Accepts everything by default.
    fn accepts(&self, _error: &HandlerError) -> bool {
        true
    }

    /// Write a response for `error`.
    fn catch(&self, error: &HandlerError, host: &mut ArgumentsHost<'_>);
}

/// A filter that only accepts errors of type `E`.
pub struct CatchType<E, F> {
    handler: F,
    _error: PhantomData<fn() -> E>,
}

impl<E, F> ExceptionFilter for CatchType<E, F>
where
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(&E, &mut ArgumentsHost<'_>) + Send + Sync + 'static,
{
    fn accepts(&self, error: &HandlerError) -> bool {
        error.downcast_ref::<E>().is_some()
    }

    fn catch(&self, error: &HandlerError, host: &mut ArgumentsHost<'_>) {
        if let Some(typed) = error.downcast_ref::<E>() {
            (self.handler)(typed, host);
        }
    }
}

/// Build a filter for errors of type `E`.
pub fn catch_type<E, F>(handler: F) -> Arc<dyn ExceptionFilter>
where
    E: std::error::Error + Send + Sync + 'static,
    F: Fn(&E, &mut ArgumentsHost<'_>) + Send + Sync + 'static,
{
    Arc::new(CatchType {
        handler,
        _error: PhantomData,
    })
}

/// Run the filter chain for `error`: `scopes` in order, then the default.
///
/// The response is always finished afterwards.
pub(crate) fn handle_error(
    scopes: &[&[Arc<dyn ExceptionFilter>]],
    error: &HandlerError,
    host: &mut ArgumentsHost<'_>,
) {
    let filter = scopes
        .iter()
        .flat_map(|scope| scope.iter())
        .find(|filter| filter.accepts(error));

    match filter {
        Some(filter) => filter.catch(error, host),
        None => {
            debug!(error = %error, "No exception filter accepted the error, using default");
            HttpExceptionFilter.catch(error, host);
        }
    }

    if !host.response.is_finished() {
        host.response.end();
    }
}
