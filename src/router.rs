//! Prefix-scoped route registration.
//!
//! A [`Router`] is a view onto a shared route table: a path prefix plus an
//! ordered middleware sequence. Deriving a router ([`Router::group`],
//! [`Router::with`]) copies the view and shares the table. Registering a
//! handler composes the view's middleware around it right then and stores the
//! result, so a route's behaviour never changes after it is registered.
//!
//! ```rust
//! use trellis::{Middleware, Next, Request, Response, Router};
//!
//! # fn main() -> Result<(), trellis::Error> {
//! let audit = Middleware::from_fn(|req: Request, next: Next| next.run(req));
//!
//! let root = Router::new();
//! let api = root.group("/api").with([audit]);
//! api.handle("GET /ping", |_req: Request| async { Response::text("pong") })?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use http::Method;
use matchit::Router as MatchitRouter;

use crate::app::App;
use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::{Middleware, chain};
use crate::middleware::logger::RequestLogger;

/// One radix tree per HTTP method.
pub(crate) type RouteTable = HashMap<Method, MatchitRouter<BoxedHandler>>;

/// A registration scope: prefix, middleware, and the shared route table.
///
/// Cloning yields another handle onto the same table with the same scope.
#[derive(Clone)]
pub struct Router {
    prefix: String,
    middlewares: Arc<[Middleware]>,
    table: Arc<Mutex<RouteTable>>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
            middlewares: Vec::new().into(),
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn middlewares(&self) -> &[Middleware] {
        &self.middlewares
    }

    /// Appends middleware to this router's own sequence.
    ///
    /// Only handlers registered through this router afterwards see it.
    /// Routers already derived from this one, and routes already registered,
    /// keep the sequence they captured.
    pub fn layer(&mut self, middlewares: impl IntoIterator<Item = Middleware>) -> &mut Self {
        self.middlewares = self.extended(middlewares);
        self
    }

    /// Returns a router with `middlewares` appended, leaving `self` untouched.
    pub fn with(&self, middlewares: impl IntoIterator<Item = Middleware>) -> Router {
        Router {
            prefix: self.prefix.clone(),
            middlewares: self.extended(middlewares),
            table: Arc::clone(&self.table),
        }
    }

    /// Returns a router whose prefix is this prefix followed by `prefix`.
    pub fn group(&self, prefix: &str) -> Router {
        Router {
            prefix: format!("{}{prefix}", self.prefix),
            middlewares: Arc::clone(&self.middlewares),
            table: Arc::clone(&self.table),
        }
    }

    /// Registers `handler` under `pattern`, which must read `"<METHOD> <path>"`.
    ///
    /// The route is stored as `<METHOD> <prefix><path>` behind this router's
    /// middleware, composed now. Path syntax (`{param}`, `{*rest}`) is that
    /// of the route table; conflicting or duplicate paths are rejected by it.
    pub fn handle(&self, pattern: &str, handler: impl Handler) -> Result<(), Error> {
        let (method, path) = parse_pattern(pattern)?;
        let full_path = format!("{}{path}", self.prefix);
        let handler = chain(&self.middlewares, handler.into_boxed_handler());

        self.lock()
            .entry(method.clone())
            .or_default()
            .insert(full_path.as_str(), handler)
            .map_err(|source| Error::Route {
                pattern: format!("{method} {full_path}"),
                source,
            })?;

        tracing::debug!(
            %method,
            path = %full_path,
            middlewares = self.middlewares.len(),
            "route registered"
        );
        Ok(())
    }

    /// Typed shorthand for [`handle`](Router::handle).
    pub fn on(&self, method: Method, path: &str, handler: impl Handler) -> Result<(), Error> {
        self.handle(&format!("{method} {path}"), handler)
    }

    /// Freezes the routes registered so far into a dispatchable [`App`].
    ///
    /// Later registrations through any clone of this router do not reach the
    /// returned app.
    pub fn into_app(self, logger: RequestLogger) -> App {
        let table = self.lock().clone();
        App::new(table, logger)
    }

    fn extended(&self, extra: impl IntoIterator<Item = Middleware>) -> Arc<[Middleware]> {
        self.middlewares.iter().cloned().chain(extra).collect()
    }

    fn lock(&self) -> MutexGuard<'_, RouteTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// Splits `"<METHOD> <path>"` on its single separating space.
fn parse_pattern(pattern: &str) -> Result<(Method, &str), Error> {
    let invalid = |reason| Error::InvalidPattern { pattern: pattern.to_owned(), reason };

    if pattern.is_empty() {
        return Err(invalid("pattern is empty"));
    }
    let (method, path) = pattern
        .split_once(' ')
        .ok_or_else(|| invalid("expected `<METHOD> <path>`"))?;
    if method.is_empty() || path.is_empty() {
        return Err(invalid("expected `<METHOD> <path>`"));
    }
    if path.contains(char::is_whitespace) {
        return Err(invalid("path must not contain whitespace"));
    }
    let method =
        Method::from_bytes(method.as_bytes()).map_err(|_| invalid("invalid method token"))?;
    Ok((method, path))
}
