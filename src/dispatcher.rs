//! Request dispatch.
//!
//! For one request: match a route across all controllers, run middleware
//! (global, controller, route), run guards in the same order, invoke the
//! handler and write its reply. Any error raised along the way goes through
//! the exception filter chain. Before every step the dispatcher checks
//! whether the response has already been finished.

use crate::common::{Request, Response};
use crate::controller::{BoundController, RouteHandler};
use crate::error::HandlerError;
use crate::exception::{handle_error, ArgumentsHost, ExceptionFilter, HttpException};
use crate::guard::{check_all, Guard};
use crate::middleware::{run_chain, Flow, MiddlewareInvocable};
use crate::routing::{CompiledRoute, HttpMethod, RequestMatcher};
use axum::http::StatusCode;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

/// One row of the route listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    pub method: String,
    pub path: String,
    pub handler: String,
}

#[derive(Default)]
pub struct Dispatcher {
    controllers: Vec<BoundController>,
    middleware: Vec<MiddlewareInvocable>,
    guards: Vec<Arc<dyn Guard>>,
    filters: Vec<Arc<dyn ExceptionFilter>>,
    strict_slash: bool,
}

struct Matched<'a> {
    controller: &'a BoundController,
    route: &'a CompiledRoute<RouteHandler>,
    params: HashMap<String, String>,
}

impl Dispatcher {
    pub(crate) fn new(
        controllers: Vec<BoundController>,
        middleware: Vec<MiddlewareInvocable>,
        guards: Vec<Arc<dyn Guard>>,
        filters: Vec<Arc<dyn ExceptionFilter>>,
        strict_slash: bool,
    ) -> Self {
        Self {
            controllers,
            middleware,
            guards,
            filters,
            strict_slash,
        }
    }

    /// Every route, controller by controller, in matching order.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.controllers
            .iter()
            .flat_map(|controller| controller.table.iter())
            .map(|route| RouteInfo {
                method: route.method.to_string(),
                path: route.path.clone(),
                handler: route.handler_name.clone(),
            })
            .collect()
    }

    fn find(&self, path: &str, method: HttpMethod) -> Option<Matched<'_>> {
        if self.strict_slash && path.len() > 1 && path.ends_with('/') {
            return None;
        }
        let found = RequestMatcher::across(self.controllers.iter().map(|controller| &controller.table))
            .match_request(path, method)?;
        Some(Matched {
            controller: self.controllers.get(found.table)?,
            route: found.route,
            params: found.params,
        })
    }

    /// Serve one request. Always produces a finished response.
    pub async fn dispatch(&self, mut request: Request) -> Response {
        let started = Instant::now();
        let mut response = Response::new();

        match self.find(request.path(), request.method()) {
            Some(matched) => {
                request.set_params(matched.params.clone());
                self.run_route(&matched, &mut request, &mut response).await;
            }
            None => self.not_found(&mut request, &mut response).await,
        }

        if !response.is_finished() {
            response.end();
        }
        debug!(
            method = %request.method(),
            path = %request.path(),
            status = response.status_code().as_u16(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Request served"
        );
        response
    }

    async fn not_found(&self, request: &mut Request, response: &mut Response) {
        let middleware: Vec<&MiddlewareInvocable> = self.middleware.iter().collect();
        if let Flow::Failed(error) = run_chain(&middleware, request, response).await {
            self.fail(&[self.filters.as_slice()], error, request, response);
            return;
        }
        if response.is_finished() {
            return;
        }
        let error = HttpException::not_found(format!("Cannot {} {}", request.method(), request.path()));
        self.fail(&[self.filters.as_slice()], error.into(), request, response);
    }

    async fn run_route(&self, matched: &Matched<'_>, request: &mut Request, response: &mut Response) {
        let controller = matched.controller;
        let route = &matched.route.handler;
        let scopes = [
            route.filters.as_slice(),
            controller.filters.as_slice(),
            self.filters.as_slice(),
        ];
        trace!(handler = %matched.route.handler_name, "Dispatching");

        let middleware: Vec<&MiddlewareInvocable> = self
            .middleware
            .iter()
            .chain(&controller.middleware)
            .chain(&route.middleware)
            .collect();
        match run_chain(&middleware, request, response).await {
            Flow::Continue => {}
            Flow::Stop => {
                debug!(handler = %matched.route.handler_name, "Middleware finished the response");
                return;
            }
            Flow::Failed(error) => {
                self.fail(&scopes, error, request, response);
                return;
            }
        }

        let guards: Vec<&Arc<dyn Guard>> = self
            .guards
            .iter()
            .chain(&controller.guards)
            .chain(&route.guards)
            .collect();
        if let Err(denied) = check_all(&guards, request).await {
            debug!(handler = %matched.route.handler_name, reason = %denied, "Guard denied request");
            self.fail(&scopes, HttpException::from(denied).into(), request, response);
            return;
        }
        if response.is_finished() {
            return;
        }

        match route.invoke.call(request, response).await {
            Ok(reply) => reply.write_to(response),
            Err(error) => self.fail(&scopes, error, request, response),
        }
    }

    fn fail(
        &self,
        scopes: &[&[Arc<dyn ExceptionFilter>]],
        error: HandlerError,
        request: &Request,
        response: &mut Response,
    ) {
        if response.is_finished() {
            debug!(error = %error, "Error raised after the response was finished");
            return;
        }
        handle_error(scopes, &error, &mut ArgumentsHost::new(request, response));
    }

    /// Adapter for requests coming from axum.
    pub(crate) async fn handle_axum(&self, request: axum::extract::Request, body_limit: usize) -> axum::response::Response {
        let (parts, body) = request.into_parts();
        let Ok(method) = HttpMethod::try_from(&parts.method) else {
            return self.reject(StatusCode::METHOD_NOT_ALLOWED, format!("Method {} is not supported", parts.method));
        };
        let body = match axum::body::to_bytes(body, body_limit).await {
            Ok(body) => body,
            Err(e) => return self.reject(StatusCode::PAYLOAD_TOO_LARGE, e.to_string()),
        };
        let request = Request::from_parts(method, &parts.uri, parts.headers, body);
        self.dispatch(request).await.into_axum()
    }

    fn reject(&self, status: StatusCode, message: String) -> axum::response::Response {
        let request = Request::new(HttpMethod::Get, "/");
        let mut response = Response::new();
        self.fail(&[self.filters.as_slice()], HttpException::new(status, message).into(), &request, &mut response);
        response.into_axum()
    }
}
