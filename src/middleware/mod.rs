//! Request middleware.
//!
//! Two shapes are supported and told apart by variant, never by inspecting
//! the callable:
//!
//! - [`Middleware`]: an object called with the request and response;
//!   the chain continues unless it finished the response.
//! - callback: `(request, response, next)`; the chain continues only when
//!   the callback calls [`Next::proceed`].

use crate::common::{Request, Response};
use crate::error::{HandlerError, HandlerResult};
use async_trait::async_trait;
use std::sync::Arc;
use strum_macros::Display;
use tracing::{trace, warn};

#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    async fn handle(&self, request: &mut Request, response: &mut Response) -> HandlerResult<()>;
}

/// Continuation handed to callback middleware.
#[derive(Debug, Default)]
pub struct Next {
    called: bool,
    error: Option<HandlerError>,
}

impl Next {
    /// Let the request move on to the next step.
    pub fn proceed(&mut self) {
        self.called = true;
    }

    /// Stop the chain and hand `error` to the exception filters.
    pub fn fail(&mut self, error: impl Into<HandlerError>) {
        self.called = true;
        self.error = Some(error.into());
    }
}

type Callback = dyn Fn(&mut Request, &mut Response, &mut Next) + Send + Sync;

#[derive(Clone)]
pub enum MiddlewareInvocable {
    Context(Arc<dyn Middleware>),
    Callback(Arc<Callback>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MiddlewareKind {
    Context,
    Callback,
}

/// Result of one middleware step.
#[derive(Debug)]
pub(crate) enum Flow {
    Continue,
    /// The response was finished, or the callback did not call `next`.
    Stop,
    Failed(HandlerError),
}

impl MiddlewareInvocable {
    pub fn context(middleware: impl Middleware) -> Self {
        MiddlewareInvocable::Context(Arc::new(middleware))
    }

    pub fn callback<F>(callback: F) -> Self
    where
        F: Fn(&mut Request, &mut Response, &mut Next) + Send + Sync + 'static,
    {
        MiddlewareInvocable::Callback(Arc::new(callback))
    }

    pub fn kind(&self) -> MiddlewareKind {
        match self {
            MiddlewareInvocable::Context(_) => MiddlewareKind::Context,
            MiddlewareInvocable::Callback(_) => MiddlewareKind::Callback,
        }
    }

    pub(crate) async fn invoke(&self, request: &mut Request, response: &mut Response) -> Flow {
        match self {
            MiddlewareInvocable::Context(middleware) => match middleware.handle(request, response).await {
                Err(e) => Flow::Failed(e),
                Ok(()) if response.is_finished() => Flow::Stop,
                Ok(()) => Flow::Continue,
            },
            MiddlewareInvocable::Callback(callback) => {
                let mut next = Next::default();
                callback(request, response, &mut next);
                match next {
                    Next { error: Some(e), .. } => Flow::Failed(e),
                    _ if response.is_finished() => Flow::Stop,
                    Next { called: true, .. } => Flow::Continue,
                    Next { called: false, .. } => {
                        warn!(path = %request.path(), "Middleware neither called next nor finished the response");
                        response.end();
                        Flow::Stop
                    }
                }
            }
        }
    }
}

/// Run `chain` in order. The finished check runs before every step.
pub(crate) async fn run_chain(
    chain: &[&MiddlewareInvocable],
    request: &mut Request,
    response: &mut Response,
) -> Flow {
    for (position, middleware) in chain.iter().enumerate() {
        if response.is_finished() {
            trace!(position, "Response finished, skipping remaining middleware");
            return Flow::Stop;
        }
        match middleware.invoke(request, response).await {
            Flow::Continue => {}
            other => return other,
        }
    }
    if response.is_finished() {
        Flow::Stop
    } else {
        Flow::Continue
    }
}
