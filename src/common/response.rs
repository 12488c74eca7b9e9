use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

/// The response being built for one request.
///
/// Once [`end`](Response::end) has been called, directly or through one of
/// the body writers, the response is finished and later writes are ignored.
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    finished: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            finished: false,
        }
    }

    pub fn status(&mut self, status: StatusCode) -> &mut Self {
        if self.guard_finished("status") {
            self.status = status;
        }
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> &mut Self {
        if !self.guard_finished("header") {
            return self;
        }
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = name, "Ignoring invalid response header"),
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Serialize `value` as the JSON body and finish.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        match serde_json::to_vec(value) {
            Ok(body) => self.send("application/json", body),
            Err(e) => {
                warn!(error = %e, "Response body could not be serialized");
                self.status(StatusCode::INTERNAL_SERVER_ERROR).end()
            }
        }
    }

    pub fn text(&mut self, text: impl Into<String>) -> &mut Self {
        self.send("text/plain; charset=utf-8", text.into())
    }

    /// Write a raw body with the given content type and finish.
    pub fn send(&mut self, content_type: &str, body: impl Into<Bytes>) -> &mut Self {
        if !self.guard_finished("body") {
            return self;
        }
        if !self.headers.contains_key(header::CONTENT_TYPE) {
            self.set_header(header::CONTENT_TYPE.as_str(), content_type);
        }
        self.body = body.into();
        self.end()
    }

    /// Finish the response. Calling it again has no effect.
    pub fn end(&mut self) -> &mut Self {
        self.finished = true;
        self
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    fn guard_finished(&self, what: &str) -> bool {
        if self.finished {
            debug!(what, "Response already finished, write ignored");
        }
        !self.finished
    }

    pub fn into_axum(self) -> axum::response::Response {
        let mut response = axum::response::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// What a handler hands back.
///
/// If the handler already finished the response itself, the reply is
/// dropped.
#[derive(Debug, Clone, Default)]
pub enum Reply {
    /// End the response as it is.
    #[default]
    Empty,
    Text(String),
    Json(serde_json::Value),
    Raw { content_type: String, body: Bytes },
    WithStatus(StatusCode, Box<Reply>),
}

impl Reply {
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        serde_json::to_value(value).map(Reply::Json)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Reply::Text(text.into())
    }

    pub fn with_status(self, status: StatusCode) -> Self {
        Reply::WithStatus(status, Box::new(self))
    }

    pub(crate) fn write_to(self, response: &mut Response) {
        if response.is_finished() {
            debug!("Handler reply dropped, response already finished");
            return;
        }
        match self {
            Reply::Empty => {
                response.end();
            }
            Reply::Text(text) => {
                response.text(text);
            }
            Reply::Json(value) => {
                response.json(&value);
            }
            Reply::Raw { content_type, body } => {
                response.send(&content_type, body);
            }
            Reply::WithStatus(status, inner) => {
                response.status(status);
                inner.write_to(response);
            }
        }
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

impl From<String> for Reply {
    fn from(value: String) -> Self {
        Reply::Text(value)
    }
}

impl From<&str> for Reply {
    fn from(value: &str) -> Self {
        Reply::Text(value.to_string())
    }
}

impl From<serde_json::Value> for Reply {
    fn from(value: serde_json::Value) -> Self {
        Reply::Json(value)
    }
}
