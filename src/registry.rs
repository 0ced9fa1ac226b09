//! Declarative route modules.
//!
//! A [`Module`] groups routes under its name used as a path prefix, with
//! module-wide middleware. [`register_routes`] turns a list of them into
//! [`Router`] registrations: module middleware outside, route middleware
//! inside, declaration order preserved, nothing deduplicated.

use http::Method;

use crate::error::Error;
use crate::handler::{BoxedHandler, Handler};
use crate::middleware::Middleware;
use crate::router::Router;

/// One endpoint, consumed when its module is registered.
pub struct Route {
    pub method: Method,
    pub path: String,
    pub handler: BoxedHandler,
    pub middleware: Vec<Middleware>,
}

impl Route {
    pub fn new(method: Method, path: impl Into<String>, handler: impl Handler) -> Self {
        Self {
            method,
            path: path.into(),
            handler: handler.into_boxed_handler(),
            middleware: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::GET, path, handler)
    }

    pub fn post(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::POST, path, handler)
    }

    pub fn put(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::PUT, path, handler)
    }

    pub fn delete(path: impl Into<String>, handler: impl Handler) -> Self {
        Self::new(Method::DELETE, path, handler)
    }

    /// Appends route-level middleware, applied inside the module's.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }
}

/// A named set of routes sharing a prefix and middleware.
pub struct Module {
    /// Used verbatim as the path prefix, e.g. `"/api"`.
    pub name: String,
    pub routes: Vec<Route>,
    pub middleware: Vec<Middleware>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), routes: Vec::new(), middleware: Vec::new() }
    }

    pub fn route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }
}

/// Registers every route of every module through `router`.
///
/// Stops at the first registration the route table refuses and returns that
/// error; routes registered before it stay registered.
pub fn register_routes(
    modules: impl IntoIterator<Item = Module>,
    router: &Router,
) -> Result<(), Error> {
    for module in modules {
        let scoped = router.group(&module.name).with(module.middleware);
        for route in module.routes {
            let pattern = format!("{} {}", route.method, route.path);
            scoped.with(route.middleware).handle(&pattern, route.handler)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use http::StatusCode;

    use super::*;
    use crate::middleware::logger::{LoggerConfig, MemorySink, RequestLogger};
    use crate::middleware::tests::{get, recorder};
    use crate::request::Request;

    #[tokio::test]
    async fn module_middleware_wraps_route_middleware() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let modules = [Module::new("/admin")
            .middleware(recorder(&log, "module"))
            .route(
                Route::get("/stats", |_req: Request| async { "stats" })
                    .middleware(recorder(&log, "route")),
            )];

        let router = Router::new();
        register_routes(modules, &router).unwrap();
        let app = router.into_app(RequestLogger::new(LoggerConfig::default(), MemorySink::new()));

        let res = app.call(get("/admin/stats")).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            *log.lock().unwrap(),
            ["module:before", "route:before", "route:after", "module:after"]
        );
    }

    #[tokio::test]
    async fn route_middleware_stays_on_its_route() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let modules = [Module::new("/m")
            .route(
                Route::get("/a", |_req: Request| async { "a" })
                    .middleware(recorder(&log, "only-a")),
            )
            .route(Route::get("/b", |_req: Request| async { "b" }))];

        let router = Router::new();
        register_routes(modules, &router).unwrap();
        let app = router.into_app(RequestLogger::new(LoggerConfig::default(), MemorySink::new()));

        app.call(get("/m/b")).await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn duplicate_routes_surface_the_table_error() {
        let modules = [
            Module::new("/x").route(Route::get("/same", |_req: Request| async { "1" })),
            Module::new("/x").route(Route::get("/same", |_req: Request| async { "2" })),
        ];
        let err = register_routes(modules, &Router::new()).unwrap_err();
        assert!(matches!(err, Error::Route { .. }));
    }

    #[test]
    fn invalid_route_path_is_rejected() {
        let modules = [Module::new("/x").route(Route::get("", |_req: Request| async { "1" }))];
        let err = register_routes(modules, &Router::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { .. }));
    }
}
