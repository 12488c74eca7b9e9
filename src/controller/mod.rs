//! Controller declarations.
//!
//! A controller is an [`Injectable`] type plus a [`ControllerDescriptor`]
//! listing its routes. Handlers receive the controller instance the
//! container built, so they can reach every injected dependency.
//!
//! ```
//! use trellis::controller::{ControllerDescriptor, Handler};
//! use trellis::di::{Args, Injectable};
//! use serde_json::json;
//!
//! struct HealthController;
//!
//! impl Injectable for HealthController {
//!     fn inject(_: &Args) -> trellis::Result<Self> {
//!         Ok(HealthController)
//!     }
//! }
//!
//! let descriptor = ControllerDescriptor::<HealthController>::new("/health")
//!     .get("/", "status", Handler::sync(|_, _, _| Ok(json!({ "up": true }))))
//!     .get("/deep", "deep", Handler::future(|_, _| async { Ok("fine") }));
//! assert_eq!(descriptor.routes().len(), 2);
//! ```

use crate::common::{Reply, Request, Response};
use crate::di::{BoxFuture, ClassDescriptor, Injectable, Instance, ProviderToken};
use crate::error::{HandlerResult, Result, TrellisError};
use crate::exception::ExceptionFilter;
use crate::guard::Guard;
use crate::middleware::MiddlewareInvocable;
use crate::routing::{join_paths, CompiledRoute, HttpMethod, RoutePath, RouteTable};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

type SyncFn<C> = dyn Fn(&C, &Request, &mut Response) -> HandlerResult<Reply> + Send + Sync;
type AsyncFn<C> = dyn Fn(Arc<C>, Request) -> BoxFuture<HandlerResult<Reply>> + Send + Sync;

/// A route handler, bound to a controller type `C`.
pub enum Handler<C> {
    /// Runs to completion on the dispatching task.
    Sync(Arc<SyncFn<C>>),
    /// Returns a future that is awaited before the response is finished.
    Async(Arc<AsyncFn<C>>),
}

impl<C> Clone for Handler<C> {
    fn clone(&self) -> Self {
        match self {
            Handler::Sync(f) => Handler::Sync(Arc::clone(f)),
            Handler::Async(f) => Handler::Async(Arc::clone(f)),
        }
    }
}

impl<C: Send + Sync + 'static> Handler<C> {
    pub fn sync<F, R>(f: F) -> Self
    where
        F: Fn(&C, &Request, &mut Response) -> HandlerResult<R> + Send + Sync + 'static,
        R: Into<Reply>,
    {
        Handler::Sync(Arc::new(move |controller: &C, request: &Request, response: &mut Response| {
            f(controller, request, response).map(Into::into)
        }))
    }

    pub fn future<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Arc<C>, Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
        R: Into<Reply> + 'static,
    {
        Handler::Async(Arc::new(move |controller: Arc<C>, request: Request| {
            let pending = f(controller, request);
            Box::pin(async move { pending.await.map(Into::into) }) as BoxFuture<HandlerResult<Reply>>
        }))
    }

    fn bind(&self, controller: Arc<C>) -> ErasedHandler {
        match self {
            Handler::Sync(f) => {
                let f = Arc::clone(f);
                ErasedHandler::Sync(Arc::new(move |request: &Request, response: &mut Response| {
                    f(&*controller, request, response)
                }))
            }
            Handler::Async(f) => {
                let f = Arc::clone(f);
                ErasedHandler::Async(Arc::new(move |request: Request| f(Arc::clone(&controller), request)))
            }
        }
    }
}

/// One route of a controller, with its own middleware, guards and filters.
pub struct RouteDefinition<C> {
    pub method: HttpMethod,
    pub path: RoutePath,
    pub name: String,
    handler: Handler<C>,
    middleware: Vec<MiddlewareInvocable>,
    guards: Vec<Arc<dyn Guard>>,
    filters: Vec<Arc<dyn ExceptionFilter>>,
}

impl<C> Clone for RouteDefinition<C> {
    fn clone(&self) -> Self {
        Self {
            method: self.method,
            path: self.path.clone(),
            name: self.name.clone(),
            handler: self.handler.clone(),
            middleware: self.middleware.clone(),
            guards: self.guards.clone(),
            filters: self.filters.clone(),
        }
    }
}

impl<C> RouteDefinition<C> {
    pub fn new(method: HttpMethod, path: impl Into<RoutePath>, name: impl Into<String>, handler: Handler<C>) -> Self {
        Self {
            method,
            path: path.into(),
            name: name.into(),
            handler,
            middleware: Vec::new(),
            guards: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn middleware(mut self, middleware: MiddlewareInvocable) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn ExceptionFilter>) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Routes and request pipeline of controller type `C`.
pub struct ControllerDescriptor<C> {
    name: String,
    prefix: String,
    routes: Vec<RouteDefinition<C>>,
    middleware: Vec<MiddlewareInvocable>,
    guards: Vec<Arc<dyn Guard>>,
    filters: Vec<Arc<dyn ExceptionFilter>>,
}

macro_rules! method_shorthands {
    ($($fn_name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $fn_name(self, path: impl Into<RoutePath>, name: impl Into<String>, handler: Handler<C>) -> Self {
                self.route(RouteDefinition::new(HttpMethod::$method, path, name, handler))
            }
        )*
    };
}

impl<C: Injectable> ControllerDescriptor<C> {
    pub fn new(prefix: impl Into<String>) -> Self {
        let type_name = std::any::type_name::<C>();
        Self {
            name: type_name.rsplit("::").next().unwrap_or(type_name).to_string(),
            prefix: prefix.into(),
            routes: Vec::new(),
            middleware: Vec::new(),
            guards: Vec::new(),
            filters: Vec::new(),
        }
    }

    pub fn route(mut self, route: RouteDefinition<C>) -> Self {
        self.routes.push(route);
        self
    }

    method_shorthands! {
        get => Get,
        post => Post,
        put => Put,
        patch => Patch,
        delete => Delete,
        head => Head,
        options => Options,
        all => All,
    }

    pub fn middleware(mut self, middleware: MiddlewareInvocable) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn filter(mut self, filter: Arc<dyn ExceptionFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn routes(&self) -> &[RouteDefinition<C>] {
        &self.routes
    }
}

/// Compile every route of `descriptor` into `table`, bound to `controller`.
///
/// Returns how many routes were added; idempotent re-registrations are not
/// counted.
pub fn register_controller<C: Injectable>(
    table: &mut RouteTable<RouteHandler>,
    descriptor: &ControllerDescriptor<C>,
    controller: Arc<C>,
    global_prefix: &str,
) -> Result<usize> {
    let prefix = join_paths(global_prefix, &descriptor.prefix);
    let mut added = 0;
    for route in &descriptor.routes {
        let handler = Arc::new(BoundRoute {
            invoke: route.handler.bind(Arc::clone(&controller)),
            middleware: route.middleware.clone(),
            guards: route.guards.clone(),
            filters: route.filters.clone(),
        });
        let compiled = CompiledRoute::compile(
            route.method,
            &route.path.clone().prefixed(&prefix),
            format!("{}.{}", descriptor.name, route.name),
            handler,
        )?;
        if table.add_route(compiled)? {
            added += 1;
        }
    }
    debug!(controller = %descriptor.name, prefix = %prefix, routes = added, "Controller registered");
    Ok(added)
}

pub(crate) enum ErasedHandler {
    Sync(Arc<dyn Fn(&Request, &mut Response) -> HandlerResult<Reply> + Send + Sync>),
    Async(Arc<dyn Fn(Request) -> BoxFuture<HandlerResult<Reply>> + Send + Sync>),
}

impl ErasedHandler {
    pub(crate) async fn call(&self, request: &Request, response: &mut Response) -> HandlerResult<Reply> {
        match self {
            ErasedHandler::Sync(f) => f(request, response),
            ErasedHandler::Async(f) => f(request.clone()).await,
        }
    }
}

/// A route handler bound to a controller instance.
pub struct BoundRoute {
    pub(crate) invoke: ErasedHandler,
    pub(crate) middleware: Vec<MiddlewareInvocable>,
    pub(crate) guards: Vec<Arc<dyn Guard>>,
    pub(crate) filters: Vec<Arc<dyn ExceptionFilter>>,
}

impl std::fmt::Debug for BoundRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundRoute")
            .field("middleware", &self.middleware.len())
            .field("guards", &self.guards.len())
            .field("filters", &self.filters.len())
            .finish()
    }
}

pub type RouteHandler = Arc<BoundRoute>;

/// A controller whose routes are bound to its instance.
pub struct BoundController {
    pub name: String,
    pub table: RouteTable<RouteHandler>,
    pub(crate) middleware: Vec<MiddlewareInvocable>,
    pub(crate) guards: Vec<Arc<dyn Guard>>,
    pub(crate) filters: Vec<Arc<dyn ExceptionFilter>>,
}

type Binder = dyn Fn(&Instance, &str) -> Result<BoundController> + Send + Sync;

/// A controller with its type erased, as stored in a module.
#[derive(Clone)]
pub struct ControllerBlueprint {
    pub name: String,
    pub(crate) class: ClassDescriptor,
    binder: Arc<Binder>,
}

impl ControllerBlueprint {
    pub fn token(&self) -> &ProviderToken {
        &self.class.token
    }

    /// Bind the routes to the instance the container built.
    pub(crate) fn bind(&self, instance: &Instance, global_prefix: &str) -> Result<BoundController> {
        (self.binder)(instance, global_prefix)
    }
}

impl<C: Injectable> From<ControllerDescriptor<C>> for ControllerBlueprint {
    fn from(descriptor: ControllerDescriptor<C>) -> Self {
        let name = descriptor.name.clone();
        let descriptor = Arc::new(descriptor);
        let binder = move |instance: &Instance, global_prefix: &str| {
            let controller = Arc::clone(instance)
                .downcast::<C>()
                .map_err(|_| TrellisError::ControllerResolution {
                    controller: descriptor.name.clone(),
                    reason: "instance has an unexpected type".to_string(),
                })?;
            let mut table = RouteTable::new();
            register_controller(&mut table, &descriptor, controller, global_prefix)?;
            Ok(BoundController {
                name: descriptor.name.clone(),
                table,
                middleware: descriptor.middleware.clone(),
                guards: descriptor.guards.clone(),
                filters: descriptor.filters.clone(),
            })
        };
        Self {
            name,
            class: ClassDescriptor::of::<C>(),
            binder: Arc::new(binder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::di::Args;
    use crate::routing::RequestMatcher;
    use serde_json::json;

    struct GreetingController {
        greeting: String,
    }

    impl Injectable for GreetingController {
        fn inject(_: &Args) -> Result<Self> {
            Ok(GreetingController {
                greeting: "hello".into(),
            })
        }
    }

    fn descriptor() -> ControllerDescriptor<GreetingController> {
        ControllerDescriptor::new("/greet")
            .get(
                "/:name",
                "one",
                Handler::sync(|c: &GreetingController, req, _| {
                    Ok(format!("{} {}", c.greeting, req.param("name").unwrap_or("?")))
                }),
            )
            .post(
                "/",
                "create",
                Handler::future(|_, req: Request| async move { Ok(json!({ "len": req.body().len() })) }),
            )
    }

    #[test]
    fn test_register_controller_prefixes_routes() {
        let mut table = RouteTable::new();
        let controller = Arc::new(GreetingController::inject(&Args::empty(ProviderToken::named("x"))).unwrap());
        let added = register_controller(&mut table, &descriptor(), controller.clone(), "/api").unwrap();
        assert_eq!(added, 2);

        let found = RequestMatcher::new(&table)
            .match_request("/api/greet/ada", HttpMethod::Get)
            .unwrap();
        assert_eq!(found.route.handler_name, "GreetingController.one");
        assert_eq!(found.param("name"), Some("ada"));

        assert_eq!(register_controller(&mut table, &descriptor(), controller, "/api").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bound_handlers_see_the_instance() {
        let blueprint = ControllerBlueprint::from(descriptor());
        let instance: Instance = Arc::new(GreetingController {
            greeting: "hi".into(),
        });
        let bound = blueprint.bind(&instance, "").unwrap();
        assert_eq!(bound.name, "GreetingController");

        let route = RequestMatcher::new(&bound.table)
            .match_request("/greet/bob", HttpMethod::Get)
            .unwrap();
        let mut request = Request::new(HttpMethod::Get, "/greet/bob");
        request.set_params(route.params.clone());
        let mut response = Response::new();
        let reply = route.route.handler.invoke.call(&request, &mut response).await.unwrap();
        let Reply::Text(text) = reply else {
            panic!("expected text");
        };
        assert_eq!(text, "hi bob");

        let route = RequestMatcher::new(&bound.table)
            .match_request("/greet", HttpMethod::Post)
            .unwrap();
        let request = Request::new(HttpMethod::Post, "/greet").with_body("abc");
        let reply = route.route.handler.invoke.call(&request, &mut response).await.unwrap();
        assert!(matches!(reply, Reply::Json(value) if value["len"] == 3));
    }

    #[test]
    fn test_bind_rejects_wrong_instance() {
        let blueprint = ControllerBlueprint::from(descriptor());
        let instance: Instance = Arc::new(5u8);
        assert!(blueprint.bind(&instance, "").is_err());
    }
}
