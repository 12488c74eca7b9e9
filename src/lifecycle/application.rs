//! Application Bootstrap
//!
//! Builds the container from the registered modules, binds every controller
//! to the instance the container produced and serves requests either from a
//! socket or injected in-process.

use super::{ServerEvent, ServerEvents};
use crate::common::{Request, Response};
use crate::config::{AppConfig, ConfigService};
use crate::di::{ApplicationKey, ProviderToken, TransferRegistry};
use crate::dispatcher::{Dispatcher, RouteInfo};
use crate::error::{Result, TrellisError};
use crate::exception::ExceptionFilter;
use crate::guard::Guard;
use crate::middleware::MiddlewareInvocable;
use crate::module::{Module, ModuleDefinition};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;

struct RunningServer {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

/// A resolved application, ready to serve.
///
/// # Example
///
/// ```rust,no_run
/// use trellis::lifecycle::Application;
/// use trellis::module::ModuleDefinition;
///
/// #[tokio::main]
/// async fn main() -> trellis::Result<()> {
///     let app = Application::builder()
///         .module(ModuleDefinition::new("AppModule").root())
///         .build()
///         .await?;
///
///     let addr = app.listen("127.0.0.1:3000").await?;
///     println!("listening on {addr}");
///
///     app.close().await
/// }
/// ```
pub struct Application {
    key: ApplicationKey,
    registry: Arc<TransferRegistry>,
    dispatcher: Arc<Dispatcher>,
    config: AppConfig,
    events: ServerEvents,
    server: Mutex<Option<RunningServer>>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    pub fn key(&self) -> ApplicationKey {
        self.key
    }

    pub fn registry(&self) -> &Arc<TransferRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn events(&self) -> &ServerEvents {
        &self.events
    }

    /// Subscribe to a server lifecycle event.
    pub fn on<F>(&self, event: ServerEvent, listener: F)
    where
        F: Fn(ServerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(event, listener);
    }

    /// Every mapped route, in matching order.
    pub fn routes(&self) -> Vec<RouteInfo> {
        self.dispatcher.routes()
    }

    /// Serve `request` without opening a socket.
    pub async fn inject(&self, request: Request) -> Response {
        self.dispatcher.dispatch(request).await
    }

    /// Look up an exported or root provider by type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.registry.get::<T>()
    }

    pub fn get_token<T: Send + Sync + 'static>(&self, token: &ProviderToken) -> Option<Arc<T>> {
        self.registry.get_token::<T>(token)
    }

    /// The dispatcher as an axum router, for mounting in an existing server.
    pub fn router(&self) -> axum::Router {
        let dispatcher = Arc::clone(&self.dispatcher);
        let body_limit = self.config.body_limit_bytes;
        let service = tower::service_fn(move |request: axum::extract::Request| {
            let dispatcher = Arc::clone(&dispatcher);
            async move { Ok::<_, Infallible>(dispatcher.handle_axum(request, body_limit).await) }
        });
        axum::Router::new().fallback_service(service)
    }

    pub async fn is_listening(&self) -> bool {
        self.server.lock().await.is_some()
    }

    /// Bind `addr` and start serving in the background.
    ///
    /// Calling this while already listening does nothing and returns the
    /// address in use.
    pub async fn listen(&self, addr: impl ToSocketAddrs) -> Result<SocketAddr> {
        let mut server = self.server.lock().await;
        if let Some(running) = server.as_ref() {
            tracing::debug!("Already listening on {}", running.addr);
            return Ok(running.addr);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TrellisError::Server(format!("failed to bind: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| TrellisError::Server(e.to_string()))?;

        let (shutdown, signal) = oneshot::channel::<()>();
        let router = self.router();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        *server = Some(RunningServer {
            addr: local,
            shutdown,
            task,
        });
        drop(server);

        tracing::info!("Application {} listening on {}", self.key, local);
        self.events.emit(ServerEvent::Start);
        Ok(local)
    }

    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// Does nothing when the application is not listening.
    pub async fn close(&self) -> Result<()> {
        let Some(running) = self.server.lock().await.take() else {
            return Ok(());
        };

        tracing::info!("Shutting down server on {}...", running.addr);
        let _ = running.shutdown.send(());
        let outcome = running.task.await;

        self.events.emit(ServerEvent::Close);
        match outcome {
            Ok(Ok(())) => {
                tracing::info!("Server shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::error!("Server stopped with an error: {}", e);
                Err(TrellisError::Server(e.to_string()))
            }
            Err(e) => Err(TrellisError::Server(format!("server task failed: {e}"))),
        }
    }
}

/// Builder for Application
#[derive(Default)]
pub struct ApplicationBuilder {
    modules: Vec<ModuleDefinition>,
    middleware: Vec<MiddlewareInvocable>,
    guards: Vec<Arc<dyn Guard>>,
    filters: Vec<Arc<dyn ExceptionFilter>>,
    config: Option<AppConfig>,
    key: Option<ApplicationKey>,
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn module(mut self, module: ModuleDefinition) -> Self {
        self.modules.push(module);
        self
    }

    pub fn import_module<M: Module>(self) -> Self {
        self.module(M::define())
    }

    /// Middleware run before every route, and for unmatched requests.
    pub fn middleware(mut self, middleware: MiddlewareInvocable) -> Self {
        self.middleware.push(middleware);
        self
    }

    pub fn guard(mut self, guard: Arc<dyn Guard>) -> Self {
        self.guards.push(guard);
        self
    }

    /// Exception filter consulted after route and controller filters.
    pub fn filter(mut self, filter: Arc<dyn ExceptionFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Use `config` instead of reading `TRELLIS_*` from the environment.
    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn key(mut self, key: ApplicationKey) -> Self {
        self.key = Some(key);
        self
    }

    /// Resolve every module and bind the controllers.
    ///
    /// # Errors
    ///
    /// Fails on invalid route paths, route conflicts and any provider that
    /// cannot be resolved.
    pub async fn build(self) -> Result<Application> {
        let config = self
            .config
            .unwrap_or_else(|| AppConfig::from_config_service(&ConfigService::new()));
        let key = self.key.unwrap_or_default();
        tracing::info!("Starting application {} ({} modules)...", key, self.modules.len());

        let mut registry = TransferRegistry::create_new(key).with_polling(config.factory_polling());
        let mut controllers = Vec::new();
        for definition in self.modules {
            let (blueprint, blueprints) = definition.into_parts();
            let module = blueprint.name.clone();
            registry.add_module(blueprint)?;
            controllers.extend(blueprints.into_iter().map(|c| (module.clone(), c)));
        }

        if let Err(e) = registry.initialize().await {
            tracing::error!("Application {} failed to initialize: {}", key, e);
            return Err(e);
        }

        let mut bound = Vec::with_capacity(controllers.len());
        for (module, blueprint) in &controllers {
            let instance = registry
                .module(module)
                .and_then(|record| record.controller(blueprint.token()))
                .ok_or_else(|| TrellisError::ControllerResolution {
                    controller: blueprint.name.clone(),
                    reason: format!("no instance was built in module '{module}'"),
                })?;
            bound.push(blueprint.bind(instance, config.global_prefix())?);
        }

        let dispatcher = Dispatcher::new(
            bound,
            self.middleware,
            self.guards,
            self.filters,
            config.strict_slash,
        );
        let routes = dispatcher.routes();
        for route in &routes {
            tracing::debug!(method = %route.method, path = %route.path, handler = %route.handler, "Mapped route");
        }
        tracing::info!("Application initialization complete ({} routes)", routes.len());

        Ok(Application {
            key,
            registry: Arc::new(registry),
            dispatcher: Arc::new(dispatcher),
            config,
            events: ServerEvents::new(),
            server: Mutex::new(None),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Reply;
    use crate::controller::{ControllerDescriptor, Handler};
    use crate::di::{Args, Dependency, Injectable, Provider};
    use crate::routing::HttpMethod;
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Greeter;

    impl Injectable for Greeter {
        fn inject(_: &Args) -> Result<Self> {
            Ok(Greeter)
        }
    }

    struct HelloController {
        greeter: Arc<Greeter>,
    }

    impl Injectable for HelloController {
        fn dependencies() -> Vec<Dependency> {
            vec![Dependency::class::<Greeter>(0)]
        }

        fn inject(args: &Args) -> Result<Self> {
            Ok(HelloController { greeter: args.get(0)? })
        }
    }

    fn hello_module() -> ModuleDefinition {
        ModuleDefinition::new("HelloModule")
            .root()
            .provider(Provider::class::<Greeter>())
            .controller(ControllerDescriptor::<HelloController>::new("/hello").get(
                "/:name",
                "greet",
                Handler::sync(|c: &HelloController, req, _| {
                    let _ = &c.greeter;
                    Ok(Reply::text(format!("hello {}", req.param("name").unwrap_or("?"))))
                }),
            ))
    }

    async fn build(config: AppConfig) -> Application {
        Application::builder()
            .module(hello_module())
            .config(config)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_inject_runs_controller() {
        let app = build(AppConfig::default()).await;
        let response = app.inject(Request::new(HttpMethod::Get, "/hello/ada")).await;
        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"hello ada");
        assert!(app.get::<Greeter>().is_some());
    }

    #[tokio::test]
    async fn test_global_prefix_applies_to_routes() {
        let config = AppConfig {
            global_prefix: Some("/api".to_string()),
            ..AppConfig::default()
        };
        let app = build(config).await;
        assert_eq!(app.routes()[0].path, "/api/hello/:name");
        let response = app.inject(Request::new(HttpMethod::Get, "/api/hello/bob")).await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_dependency_fails_build() {
        let definition = ModuleDefinition::new("Broken")
            .controller(ControllerDescriptor::<HelloController>::new("/hello"));
        let result = Application::builder()
            .module(definition)
            .config(AppConfig::default())
            .build()
            .await;
        assert!(matches!(result, Err(e) if e.is_dependency_error()));
    }

    #[tokio::test]
    async fn test_listen_twice_then_close() {
        let app = build(AppConfig::default()).await;
        let starts = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let (s, c) = (starts.clone(), closes.clone());
        app.on(ServerEvent::Start, move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });
        app.on(ServerEvent::Close, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let first = app.listen("127.0.0.1:0").await.unwrap();
        let second = app.listen("127.0.0.1:0").await.unwrap();
        assert_eq!(first, second);
        assert!(app.is_listening().await);
        assert_eq!(starts.load(Ordering::SeqCst), 1);

        app.close().await.unwrap();
        app.close().await.unwrap();
        assert!(!app.is_listening().await);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_router_serves_through_tower() {
        use tower::ServiceExt;

        let app = build(AppConfig::default()).await;
        let request = axum::http::Request::builder()
            .uri("/hello/tower")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"hello tower");
    }

    #[tokio::test]
    async fn test_router_runs_middleware_and_guards() {
        use crate::guard::guard_fn;
        use crate::middleware::MiddlewareInvocable;
        use tower::ServiceExt;

        fn assert_send<T: Send>(_: &T) {}

        let app = Application::builder()
            .module(hello_module())
            .middleware(MiddlewareInvocable::callback(|request, _, next| {
                if request.header("x-api-key").is_some() {
                    request.set_header("x-role", "member");
                }
                next.proceed();
            }))
            .guard(guard_fn("members only", |request| request.header("x-role") == Some("member")))
            .config(AppConfig::default())
            .build()
            .await
            .unwrap();
        assert_send(&app.dispatcher.dispatch(Request::new(HttpMethod::Get, "/hello/x")));

        let request = axum::http::Request::builder()
            .uri("/hello/member")
            .header("x-api-key", "k")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(body.as_ref(), b"hello member");

        let request = axum::http::Request::builder()
            .uri("/hello/stranger")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
