//! Middleware layer.
//!
//! A [`Middleware`] turns one handler into another. An ordered slice of them
//! is folded around a terminal handler by [`chain`]: the first middleware in
//! the slice is the outermost, so it sees the request first and the response
//! last. Register cross-cutting concerns in the order they should intercept.
//!
//! Per-request access logging lives in [`logger`]; it wraps the whole route
//! table rather than individual routes.

pub mod logger;

use std::future::Future;
use std::sync::Arc;

use crate::handler::{BoxFuture, BoxedHandler, boxed};
use crate::request::Request;
use crate::response::IntoResponse;

/// A handler-to-handler transform.
///
/// Carries no identity beyond its position in a sequence; cloning is cheap.
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static>);

impl Middleware {
    /// Wraps a raw transform.
    ///
    /// ```rust
    /// use trellis::{Middleware, Request, handler};
    ///
    /// let passthrough = Middleware::new(|next| {
    ///     handler::boxed(move |req: Request| next.call(req))
    /// });
    /// ```
    pub fn new<F>(wrap: F) -> Self
    where
        F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
    {
        Self(Arc::new(wrap))
    }

    /// Builds middleware from an async function of the request and the rest
    /// of the chain.
    ///
    /// ```rust
    /// use trellis::{Middleware, Next, Request};
    ///
    /// let tag = Middleware::from_fn(|req: Request, next: Next| async move {
    ///     let mut res = next.run(req).await;
    ///     res.headers_mut().insert("x-served-by", "trellis".parse().unwrap());
    ///     res
    /// });
    /// ```
    pub fn from_fn<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse + Send + 'static,
    {
        let f = Arc::new(f);
        Self::new(move |inner| {
            let f = Arc::clone(&f);
            boxed(move |req: Request| f(req, Next(inner.clone())))
        })
    }

    /// Applies this middleware to `handler`.
    pub fn wrap(&self, handler: BoxedHandler) -> BoxedHandler {
        (self.0)(handler)
    }
}

/// The remainder of a middleware chain, as seen from inside one middleware.
pub struct Next(BoxedHandler);

impl Next {
    pub fn run(self, req: Request) -> BoxFuture {
        self.0.call(req)
    }
}

/// Composes `middlewares` around `terminal` into one handler.
///
/// The last middleware wraps `terminal` first and each earlier one wraps the
/// result. With no middlewares `terminal` is returned as-is.
pub fn chain(middlewares: &[Middleware], terminal: BoxedHandler) -> BoxedHandler {
    if middlewares.is_empty() {
        return terminal;
    }
    middlewares
        .iter()
        .rev()
        .fold(terminal, |inner, middleware| middleware.wrap(inner))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::response::Response;

    pub(crate) fn get(uri: &str) -> Request {
        let req = http::Request::get(uri).body(Bytes::new()).unwrap();
        Request::from_http(req, None)
    }

    pub(crate) fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Middleware {
        let log = Arc::clone(log);
        Middleware::from_fn(move |req: Request, next: Next| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(format!("{name}:before"));
                let res = next.run(req).await;
                log.lock().unwrap().push(format!("{name}:after"));
                res
            }
        })
    }

    #[tokio::test]
    async fn first_middleware_is_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let terminal_log = Arc::clone(&log);
        let terminal = boxed(move |_req: Request| {
            let log = Arc::clone(&terminal_log);
            async move {
                log.lock().unwrap().push("handler".to_owned());
                Response::text("ok")
            }
        });

        let mws = [recorder(&log, "m1"), recorder(&log, "m2"), recorder(&log, "m3")];
        chain(&mws, terminal).call(get("/")).await;

        assert_eq!(
            *log.lock().unwrap(),
            [
                "m1:before", "m2:before", "m3:before",
                "handler",
                "m3:after", "m2:after", "m1:after",
            ]
        );
    }

    #[test]
    fn empty_chain_returns_terminal_itself() {
        let terminal = boxed(|_req: Request| async { "ok" });
        let composed = chain(&[], terminal.clone());
        assert!(composed.ptr_eq(&terminal));
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        let deny = Middleware::from_fn(|_req: Request, _next: Next| async {
            Response::status(http::StatusCode::UNAUTHORIZED)
        });
        let terminal = boxed(|_req: Request| async { "secret" });

        let res = chain(&[deny], terminal).call(get("/")).await;
        assert_eq!(res.status_code(), http::StatusCode::UNAUTHORIZED);
        assert!(res.body().is_empty());
    }

    #[tokio::test]
    async fn raw_middleware_wraps_boxed_handler() {
        let upper = Middleware::new(|next: BoxedHandler| {
            boxed(move |req: Request| {
                let next = next.clone();
                async move {
                    let res = next.call(req).await;
                    String::from_utf8_lossy(res.body()).to_uppercase()
                }
            })
        });
        let terminal = boxed(|_req: Request| async { "quiet" });

        let res = chain(&[upper], terminal).call(get("/")).await;
        assert_eq!(res.body(), b"QUIET");
    }
}
