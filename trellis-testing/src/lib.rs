//! Test harness for trellis applications.
//!
//! Requests are injected straight into the dispatcher, so no socket is
//! opened and no port is needed.
//!
//! ```rust,no_run
//! use trellis::ModuleDefinition;
//! use trellis_testing::{TestApp, TestRequest};
//!
//! # async fn run() -> trellis::Result<()> {
//! let app = TestApp::from_modules([ModuleDefinition::new("AppModule").root()]).await?;
//! let response = app.inject(TestRequest::get("/health")).await;
//! assert_eq!(response.status(), 404);
//! # Ok(())
//! # }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ops::Deref;
use tracing_subscriber::filter::LevelFilter;
use trellis::axum::body::Bytes;
use trellis::axum::http::{HeaderMap, StatusCode};
use trellis::config::AppConfig;
use trellis::routing::HttpMethod;
use trellis::{Application, ApplicationBuilder, ModuleDefinition, Request, Response};

/// Install a `fmt` subscriber writing through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(LevelFilter::DEBUG)
        .try_init();
}

/// A built application driven by injected requests.
pub struct TestApp {
    app: Application,
}

impl TestApp {
    pub async fn new(builder: ApplicationBuilder) -> trellis::Result<Self> {
        Ok(Self {
            app: builder.build().await?,
        })
    }

    /// Build from `modules` with default configuration; the environment is
    /// not consulted.
    pub async fn from_modules(
        modules: impl IntoIterator<Item = ModuleDefinition>,
    ) -> trellis::Result<Self> {
        let builder = modules
            .into_iter()
            .fold(Application::builder(), ApplicationBuilder::module)
            .config(AppConfig::default());
        Self::new(builder).await
    }

    pub fn app(&self) -> &Application {
        &self.app
    }

    pub async fn inject(&self, request: TestRequest) -> TestResponse {
        TestResponse::from(self.app.inject(request.into_request()).await)
    }
}

impl Deref for TestApp {
    type Target = Application;

    fn deref(&self) -> &Application {
        &self.app
    }
}

/// Builder for an injected request.
#[derive(Debug, Clone)]
pub struct TestRequest {
    method: HttpMethod,
    target: String,
    headers: Vec<(String, String)>,
    body: Bytes,
}

macro_rules! method_constructor {
    ($($fn_name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $fn_name(target: impl Into<String>) -> Self {
                Self::new(HttpMethod::$method, target)
            }
        )*
    };
}

impl TestRequest {
    pub fn new(method: HttpMethod, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    method_constructor! {
        get => Get,
        post => Post,
        put => Put,
        patch => Patch,
        delete => Delete,
        head => Head,
        options => Options,
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the body and set `content-type`.
    pub fn json<T: Serialize>(self, value: &T) -> Self {
        let body = serde_json::to_vec(value).unwrap_or_default();
        self.header("content-type", "application/json").body(body)
    }

    pub fn into_request(self) -> Request {
        let request = Request::new(self.method, &self.target).with_body(self.body);
        self.headers
            .iter()
            .fold(request, |request, (name, value)| request.with_header(name, value))
    }
}

/// The finished response of an injected request.
#[derive(Debug, Clone)]
pub struct TestResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl From<Response> for TestResponse {
    fn from(response: Response) -> Self {
        Self {
            status: response.status_code(),
            headers: response.headers().clone(),
            body: response.body().clone(),
        }
    }
}

impl TestResponse {
    /// The status code as a number.
    pub fn status(&self) -> u16 {
        self.status.as_u16()
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}
