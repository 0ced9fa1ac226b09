//! The frozen, dispatchable form of a [`Router`](crate::Router).

use std::collections::HashMap;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::Full;

use crate::handler::BoxedHandler;
use crate::middleware::logger::RequestLogger;
use crate::request::Request;
use crate::response::Response;
use crate::router::RouteTable;

/// A route table that no longer accepts registrations, plus its access logger.
///
/// Built by [`Router::into_app`](crate::Router::into_app) and handed to
/// [`Server::serve`](crate::Server::serve). Shared by every connection task.
pub struct App {
    table: RouteTable,
    logger: RequestLogger,
}

impl App {
    pub(crate) fn new(table: RouteTable, logger: RequestLogger) -> Self {
        Self { table, logger }
    }

    /// Serves one request: route it, run its handler chain, log the outcome.
    pub async fn call(&self, req: Request) -> http::Response<Full<Bytes>> {
        self.logger.around(req, |req| self.route(req)).await
    }

    /// Answers `req` with a bare `status` without routing it, still logged.
    pub(crate) async fn reject(
        &self,
        req: Request,
        status: StatusCode,
    ) -> http::Response<Full<Bytes>> {
        self.logger.around(req, |_req| async move { Response::status(status) }).await
    }

    async fn route(&self, mut req: Request) -> Response {
        let method = req.method().clone();
        let found = self
            .lookup(&method, req.path())
            .or_else(|| {
                (method == Method::HEAD)
                    .then(|| self.lookup(&Method::GET, req.path()))
                    .flatten()
            });

        if let Some((handler, params)) = found {
            req.params = params;
            return handler.call(req).await;
        }

        let allowed = self.allowed_methods(req.path());
        if allowed.is_empty() {
            return Response::status(StatusCode::NOT_FOUND);
        }
        Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header("allow", &allowed.join(", "))
            .no_body()
    }

    fn lookup(
        &self,
        method: &Method,
        path: &str,
    ) -> Option<(BoxedHandler, HashMap<String, String>)> {
        let tree = self.table.get(method)?;
        let matched = tree.at(path).ok()?;
        let handler = matched.value.clone();
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((handler, params))
    }

    fn allowed_methods(&self, path: &str) -> Vec<&str> {
        let mut allowed: Vec<&str> = self.table.iter()
            .filter(|(_, tree)| tree.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        allowed.sort_unstable();
        allowed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use http_body_util::BodyExt;

    use super::*;
    use crate::middleware::logger::{LogFormat, LoggerConfig, MemorySink};
    use crate::middleware::tests::get;
    use crate::router::Router;

    fn app_with_sink(router: Router) -> (App, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let logger =
            RequestLogger::new(LoggerConfig::default().format(LogFormat::Json), Arc::clone(&sink));
        (router.into_app(logger), sink)
    }

    #[tokio::test]
    async fn path_params_reach_the_handler() {
        let router = Router::new();
        router
            .handle("GET /users/{id}", |req: Request| async move {
                format!("user {}", req.param("id").unwrap_or("?"))
            })
            .unwrap();
        let (app, _) = app_with_sink(router);

        let res = app.call(get("/users/42")).await;
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"user 42");
    }

    #[tokio::test]
    async fn unknown_path_is_404_and_still_logged() {
        let (app, sink) = app_with_sink(Router::new());
        let res = app.call(get("/missing?q=1")).await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let record: serde_json::Value = serde_json::from_str(&sink.lines()[0]).unwrap();
        assert_eq!(record["status"], "404");
        assert_eq!(record["path"], "/missing?q=1");
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow() {
        let router = Router::new();
        router.handle("POST /items", |_req: Request| async { "created" }).unwrap();
        router.handle("PUT /items", |_req: Request| async { "replaced" }).unwrap();
        let (app, _) = app_with_sink(router);

        let res = app.call(get("/items")).await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(res.headers()["allow"], "POST, PUT");
    }

    #[tokio::test]
    async fn head_falls_back_to_get() {
        let router = Router::new();
        router.handle("GET /page", |_req: Request| async { "page" }).unwrap();
        let (app, _) = app_with_sink(router);

        let req = http::Request::head("/page").body(Bytes::new()).unwrap();
        let res = app.call(Request::from_http(req, None)).await;
        assert_eq!(res.status(), StatusCode::OK);
    }
}
