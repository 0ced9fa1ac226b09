//! Outgoing HTTP response type and the [`IntoResponse`] conversion trait.
//!
//! Handlers build a [`Response`] and return it. Middleware may inspect or
//! modify it on the way out. Only at the very end of a request is it streamed
//! into a [`ResponseSink`](crate::ResponseSink), which is where the access
//! logger captures the status.

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;

use crate::sink::ResponseSink;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
pub enum ContentType {
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    Html,         // text/html; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
    Xml,          // application/xml
}

impl ContentType {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Xml         => "application/xml",
        }
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing HTTP response.
///
/// A response built without an explicit status is sent as `200 OK`, the same
/// way a writer that only ever writes a body implies `200`.
///
/// ```rust
/// use trellis::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::text("pong");
/// Response::status(StatusCode::NO_CONTENT);
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .bytes(ContentType::Json, br#"{"id":42}"#.to_vec());
/// ```
pub struct Response {
    pub(crate) status: Option<StatusCode>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
}

impl Response {
    /// Implicit `200 OK`, `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::typed(ContentType::Json, body.into())
    }

    /// Implicit `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::typed(ContentType::Text, Bytes::from(body.into()))
    }

    /// Response with an explicit status and no body.
    pub fn status(code: StatusCode) -> Self {
        Self { status: Some(code), headers: HeaderMap::new(), body: Bytes::new() }
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: None }
    }

    fn typed(content_type: ContentType, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Self { status: None, headers, body }
    }

    /// The status that will go on the wire.
    pub fn status_code(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Streams this response into `sink`: status (only if set explicitly),
    /// then every header, then the body.
    pub fn write_to<S: ResponseSink + ?Sized>(self, sink: &mut S) {
        if let Some(status) = self.status {
            sink.write_status(status);
        }
        for (name, value) in &self.headers {
            sink.write_header(name.clone(), value.clone());
        }
        if !self.body.is_empty() {
            sink.write_body(self.body);
        }
    }
}

// ── ResponseBuilder ───────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Terminated by a typed body method.
/// Headers whose name or value is not valid HTTP are skipped.
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: Option<StatusCode>,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = Some(code);
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json, body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text, Bytes::from(body.into()))
    }

    /// Terminate with a typed body. Use this for XML, HTML, binary, SSE, etc.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type, body.into())
    }

    /// Terminate with no body (e.g. `204 No Content`, redirects).
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new() }
    }

    fn finish(mut self, content_type: ContentType, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Response { status: self.status, headers: self.headers, body }
    }
}

// ── IntoResponse ──────────────────────────────────────────────────────────────

/// Conversion into an HTTP [`Response`].
///
/// Implement on your own types to return them directly from handlers.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a bare status from a handler: `return StatusCode::NOT_FOUND`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{HyperSink, StatusCapture};

    #[test]
    fn shortcuts_leave_status_implicit() {
        let res = Response::text("hi");
        assert_eq!(res.status, None);
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    }

    #[test]
    fn builder_skips_invalid_headers() {
        let res = Response::builder()
            .header("x-ok", "1")
            .header("bad header", "2")
            .no_body();
        assert_eq!(res.headers().len(), 1);
        assert_eq!(res.headers()["x-ok"], "1");
    }

    #[test]
    fn write_to_streams_everything_into_the_sink() {
        let res = Response::builder()
            .status(StatusCode::CREATED)
            .header("location", "/users/7")
            .bytes(ContentType::Xml, "<ok/>");

        let mut capture = StatusCapture::new(HyperSink::new());
        res.write_to(&mut capture);
        assert_eq!(capture.status(), StatusCode::CREATED);

        let hyper_res = capture.into_inner().into_response();
        assert_eq!(hyper_res.status(), StatusCode::CREATED);
        assert_eq!(hyper_res.headers()["location"], "/users/7");
        assert_eq!(hyper_res.headers()[CONTENT_TYPE], "application/xml");
    }
}
