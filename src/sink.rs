//! Outbound response sinks and per-request status capture.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::Full;

/// Where a finished [`Response`](crate::Response) is written.
pub trait ResponseSink {
    fn write_status(&mut self, status: StatusCode);
    fn write_header(&mut self, name: HeaderName, value: HeaderValue);
    fn write_body(&mut self, chunk: Bytes);
}

impl<S: ResponseSink + ?Sized> ResponseSink for &mut S {
    fn write_status(&mut self, status: StatusCode) { (**self).write_status(status) }
    fn write_header(&mut self, name: HeaderName, value: HeaderValue) {
        (**self).write_header(name, value)
    }
    fn write_body(&mut self, chunk: Bytes) { (**self).write_body(chunk) }
}

/// Accumulates a response for hand-off to hyper.
///
/// Like a wire response, the status is fixed by the first status write or,
/// failing that, by the first body write (`200`).
#[derive(Default)]
pub struct HyperSink {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl HyperSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(self.body.freeze()));
        *res.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *res.headers_mut() = self.headers;
        res
    }
}

impl ResponseSink for HyperSink {
    fn write_status(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
    }

    fn write_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.append(name, value);
    }

    fn write_body(&mut self, chunk: Bytes) {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(&chunk);
    }
}

/// Wraps one request's sink and remembers the status that was sent.
///
/// The first status write wins: it is recorded and forwarded, later ones are
/// dropped. Writing body bytes before any status commits an implicit `200`.
/// Headers and body pass through untouched.
pub struct StatusCapture<S> {
    inner: S,
    status: Option<StatusCode>,
}

impl<S: ResponseSink> StatusCapture<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, status: None }
    }

    /// The captured status, or `200` if none was ever written.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: ResponseSink> ResponseSink for StatusCapture<S> {
    fn write_status(&mut self, status: StatusCode) {
        if self.status.is_some() {
            return;
        }
        self.status = Some(status);
        self.inner.write_status(status);
    }

    fn write_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.inner.write_header(name, value);
    }

    fn write_body(&mut self, chunk: Bytes) {
        self.status.get_or_insert(StatusCode::OK);
        self.inner.write_body(chunk);
    }
}
