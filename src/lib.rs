//! # trellis
//!
//! Prefix-scoped HTTP routing with composable middleware, one access-log line
//! per request, and a development-time supervisor that restarts the app when
//! its sources change.
//!
//! ## Pieces
//!
//! - [`Router`]: a prefix plus an ordered middleware sequence over a shared
//!   route table. [`group`](Router::group) and [`with`](Router::with) derive
//!   new scopes; [`handle`](Router::handle) composes and registers.
//! - [`middleware::chain`]: folds middleware around a handler, first one
//!   outermost.
//! - [`RequestLogger`]: colorized or JSON access records with status,
//!   method, path, response time and peer address.
//! - [`register_routes`]: declarative [`Module`]s of [`Route`]s.
//! - [`reload::ReloadSupervisor`]: polls the source tree, stops the server,
//!   relaunches the app.
//!
//! Transport is hyper over tokio, paths are matched by `matchit`.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use trellis::{
//!     LoggerConfig, Middleware, Module, Next, Request, RequestLogger, Response, Route, Router,
//!     Server, TracingSink, register_routes,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), trellis::Error> {
//!     let tag = Middleware::from_fn(|req: Request, next: Next| async move {
//!         let mut res = next.run(req).await;
//!         res.headers_mut().insert("x-module", "api".parse().unwrap());
//!         res
//!     });
//!
//!     let router = Router::new();
//!     register_routes(
//!         [Module::new("/api").middleware(tag).route(Route::get("/ping", ping))],
//!         &router,
//!     )?;
//!
//!     let app = router.into_app(RequestLogger::new(LoggerConfig::default(), TracingSink));
//!     Server::bind("0.0.0.0:3000")?.serve(app).await
//! }
//!
//! async fn ping(_req: Request) -> Response {
//!     Response::text("pong")
//! }
//! ```

mod app;
mod error;
mod registry;
mod request;
mod response;
mod router;
mod server;
mod sink;

pub mod handler;
pub mod middleware;
pub mod reload;

pub use app::App;
pub use error::Error;
pub use handler::{BoxedHandler, Handler};
pub use middleware::logger::{
    AccessEntry, LogFormat, LogSink, LoggerConfig, MemorySink, RequestLogger, TracingSink,
    format_response_time,
};
pub use middleware::{Middleware, Next, chain};
pub use registry::{Module, Route, register_routes};
pub use request::Request;
pub use response::{ContentType, IntoResponse, Response, ResponseBuilder};
pub use router::Router;
pub use server::{Server, ServerHandle};
pub use sink::{HyperSink, ResponseSink, StatusCapture};

pub use http::{Method, StatusCode};
