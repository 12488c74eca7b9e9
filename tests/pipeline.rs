use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use trellis::controller::{ControllerDescriptor, Handler, RouteDefinition};
use trellis::di::Args;
use trellis::prelude::*;
use trellis_testing::{init_tracing, TestApp, TestRequest};

#[derive(Default)]
struct OrderController {
    calls: AtomicUsize,
}

impl Injectable for OrderController {
    fn inject(_: &Args) -> trellis::Result<Self> {
        Ok(OrderController::default())
    }
}

#[derive(Debug, thiserror::Error)]
enum OrderError {
    #[error("route scoped")]
    Route,
    #[error("controller scoped")]
    Controller,
    #[error("global scoped")]
    Global,
    #[error("nobody handles this")]
    Unhandled,
}

fn failing(error: fn() -> OrderError) -> Handler<OrderController> {
    Handler::sync(move |c: &OrderController, _: &Request, _: &mut Response| -> HandlerResult<()> {
        c.calls.fetch_add(1, Ordering::SeqCst);
        Err(error().into())
    })
}

/// A filter for `OrderError` that only accepts the listed variants.
struct Scoped {
    scope: &'static str,
    accepts: fn(&OrderError) -> bool,
}

impl ExceptionFilter for Scoped {
    fn accepts(&self, error: &HandlerError) -> bool {
        error.downcast_ref::<OrderError>().is_some_and(self.accepts)
    }

    fn catch(&self, error: &HandlerError, host: &mut ArgumentsHost<'_>) {
        host.response
            .status(StatusCode::CONFLICT)
            .json(&json!({ "scope": self.scope, "error": error.to_string() }));
    }
}

fn scoped(scope: &'static str, accepts: fn(&OrderError) -> bool) -> Arc<dyn ExceptionFilter> {
    Arc::new(Scoped { scope, accepts })
}

fn orders() -> ControllerDescriptor<OrderController> {
    ControllerDescriptor::new("/orders")
        .route(
            RouteDefinition::new(HttpMethod::Get, "/route", "route", failing(|| OrderError::Route))
                .filter(scoped("route", |_| true)),
        )
        .get("/controller", "controller", failing(|| OrderError::Controller))
        .get("/global", "global", failing(|| OrderError::Global))
        .get("/unhandled", "unhandled", failing(|| OrderError::Unhandled))
        .get(
            "/ok",
            "ok",
            Handler::future(|c: Arc<OrderController>, _: Request| async move {
                c.calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                Ok::<_, HandlerError>(Reply::json(&json!({ "ok": true }))?)
            }),
        )
        .filter(scoped("controller", |e| {
            matches!(e, OrderError::Route | OrderError::Controller)
        }))
}

async fn app(builder: ApplicationBuilder) -> TestApp {
    init_tracing();
    let module = ModuleDefinition::new("OrdersModule").root().controller(orders());
    TestApp::new(builder.module(module).config(AppConfig::default()))
        .await
        .unwrap()
}

fn global_filter() -> Arc<dyn ExceptionFilter> {
    scoped("global", |e| !matches!(e, OrderError::Unhandled))
}

#[tokio::test]
async fn test_exception_filters_resolve_route_then_controller_then_global() {
    let app = app(Application::builder().filter(global_filter())).await;

    for (path, scope) in [
        ("/orders/route", "route"),
        ("/orders/controller", "controller"),
        ("/orders/global", "global"),
    ] {
        let response = app.inject(TestRequest::get(path)).await;
        assert_eq!(response.status(), 409, "{path}");
        assert_eq!(response.json::<Value>().unwrap()["scope"], scope, "{path}");
    }

    let response = app.inject(TestRequest::get("/orders/unhandled")).await;
    assert_eq!(response.status(), 500);
    assert_eq!(
        response.json::<Value>().unwrap()["message"],
        "Internal Server Error"
    );
}

#[tokio::test]
async fn test_finished_response_skips_handler() {
    let app = app(Application::builder().middleware(MiddlewareInvocable::callback(
        |request, response, next| {
            if request.header("authorization").is_none() {
                response.status(StatusCode::UNAUTHORIZED).text("login first");
            } else {
                next.proceed();
            }
        },
    )))
    .await;

    let denied = app.inject(TestRequest::get("/orders/ok")).await;
    assert_eq!(denied.status(), 401);
    assert_eq!(denied.text(), "login first");
    let controller = app
        .registry()
        .module("OrdersModule")
        .and_then(|m| m.controller(&ProviderToken::of::<OrderController>()))
        .cloned()
        .and_then(|instance| instance.downcast::<OrderController>().ok())
        .unwrap();
    assert_eq!(controller.calls.load(Ordering::SeqCst), 0);

    let allowed = app
        .inject(TestRequest::get("/orders/ok").header("authorization", "token"))
        .await;
    assert_eq!(allowed.status(), 200);
    assert_eq!(allowed.json::<Value>().unwrap(), json!({ "ok": true }));
    assert_eq!(controller.calls.load(Ordering::SeqCst), 1);
}

struct Trace {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Middleware for Trace {
    async fn handle(&self, request: &mut Request, _: &mut Response) -> HandlerResult<()> {
        self.log.lock().unwrap().push(format!("middleware:{}", self.label));
        request.set_header("x-seen-by", self.label);
        Ok(())
    }
}

struct Recorder {
    label: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Guard for Recorder {
    async fn can_activate(&self, _: &Request) -> GuardResult {
        self.log.lock().unwrap().push(format!("guard:{}", self.label));
        Ok(())
    }
}

#[tokio::test]
async fn test_middleware_then_guards_run_global_controller_route() {
    init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let trace = |label| MiddlewareInvocable::context(Trace { label, log: log.clone() });
    let guard = |label| -> Arc<dyn Guard> { Arc::new(Recorder { label, log: log.clone() }) };

    let handler_log = log.clone();
    let controller = ControllerDescriptor::<OrderController>::new("/traced")
        .middleware(trace("controller"))
        .guard(guard("controller"))
        .route(
            RouteDefinition::new(
                HttpMethod::Get,
                "/",
                "traced",
                Handler::sync(move |_: &OrderController, req: &Request, _: &mut Response| {
                    handler_log.lock().unwrap().push("handler".to_string());
                    Ok(req.header("x-seen-by").unwrap_or_default().to_string())
                }),
            )
            .middleware(trace("route"))
            .guard(guard("route")),
        );
    let builder = Application::builder()
        .middleware(trace("global"))
        .guard(guard("global"))
        .module(ModuleDefinition::new("TraceModule").root().controller(controller))
        .config(AppConfig::default());
    let app = TestApp::new(builder).await.unwrap();

    let response = app.inject(TestRequest::get("/traced")).await;
    assert_eq!(response.text(), "route");
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "middleware:global",
            "middleware:controller",
            "middleware:route",
            "guard:global",
            "guard:controller",
            "guard:route",
            "handler",
        ]
    );
}

#[tokio::test]
async fn test_guard_denial_becomes_forbidden() {
    init_tracing();
    let controller = ControllerDescriptor::<OrderController>::new("/orders")
        .get("/", "list", Handler::sync(|_: &OrderController, _: &Request, _: &mut Response| Ok("listed")))
        .post("/", "create", Handler::sync(|_: &OrderController, _: &Request, _: &mut Response| Ok("created")));
    let builder = Application::builder()
        .guard(guard_fn("read only", |req| req.method() == HttpMethod::Get))
        .module(ModuleDefinition::new("WriteModule").root().controller(controller))
        .config(AppConfig::default());
    let app = TestApp::new(builder).await.unwrap();

    let response = app.inject(TestRequest::get("/orders")).await;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text(), "listed");

    let response = app.inject(TestRequest::post("/orders")).await;
    assert_eq!(response.status(), 403);
    assert_eq!(response.json::<Value>().unwrap()["message"], "read only");
}

#[tokio::test]
async fn test_middleware_error_reaches_global_filter() {
    let app = app(
        Application::builder()
            .filter(global_filter())
            .middleware(MiddlewareInvocable::callback(|_, _, next| {
                next.fail(OrderError::Global);
            })),
    )
    .await;

    let response = app.inject(TestRequest::get("/orders/ok")).await;
    assert_eq!(response.status(), 409);
    assert_eq!(response.json::<Value>().unwrap()["scope"], "global");
}

#[tokio::test]
async fn test_http_exception_keeps_its_status() {
    let controller = ControllerDescriptor::<OrderController>::new("/teapot").get(
        "/",
        "brew",
        Handler::sync(|_: &OrderController, _: &Request, _: &mut Response| -> HandlerResult<()> {
            Err(HttpException::new(StatusCode::IM_A_TEAPOT, "short and stout").into())
        }),
    );
    init_tracing();
    let app = TestApp::from_modules([ModuleDefinition::new("TeaModule").root().controller(controller)])
        .await
        .unwrap();

    let response = app.inject(TestRequest::get("/teapot")).await;
    assert_eq!(response.status(), 418);
    let body: Value = response.json().unwrap();
    assert_eq!(body["statusCode"], 418);
    assert_eq!(body["message"], "short and stout");
}
