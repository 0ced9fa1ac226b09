//! A small API served with access logging and, optionally, hot reload.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example dev_server
//!   TRELLIS_RELOAD=1 RUST_LOG=info cargo run --example dev_server
//!
//! Try:
//!   curl -i http://localhost:3000/api/ping
//!   curl -i http://localhost:3000/api/users/42?verbose=1
//!   curl -i -X POST http://localhost:3000/admin/flush -H 'x-token: letmein'

use std::time::Duration;

use tokio::task::JoinHandle;

use trellis::reload::{CargoRunner, ReloadConfig, ReloadSupervisor};
use trellis::{
    LogFormat, LoggerConfig, Middleware, Module, Next, Request, RequestLogger, Response, Route,
    Router, Server, StatusCode, TracingSink, register_routes,
};

#[tokio::main]
async fn main() -> Result<(), trellis::Error> {
    tracing_subscriber::fmt::init();

    let mut router = Router::new();
    router.layer([add_header("x-powered-by", "trellis")]);

    register_routes(
        [
            Module::new("/api")
                .middleware(add_header("x-module", "api"))
                .route(Route::get("/ping", ping))
                .route(Route::get("/users/{id}", get_user)),
            Module::new("/admin")
                .middleware(require_token())
                .route(Route::post("/flush", flush)),
        ],
        &router,
    )?;

    let format = match std::env::var("TRELLIS_LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        _ => LogFormat::Colorized,
    };
    let logger = RequestLogger::new(LoggerConfig::default().format(format), TracingSink);
    let app = router.into_app(logger);

    let server = Server::bind("0.0.0.0:3000")?;
    let supervisor = if std::env::var_os("TRELLIS_RELOAD").is_some() {
        reload_supervisor(&server)
    } else {
        None
    };

    server.serve(app).await?;

    // After a reload the supervisor owns the relaunched process until Ctrl-C.
    if let Some(supervisor) = supervisor {
        if let Ok(result) = supervisor.await {
            result?;
        }
    }
    Ok(())
}

/// Watches the crate sources and relaunches this example when they change.
fn reload_supervisor(server: &Server) -> Option<JoinHandle<Result<(), trellis::Error>>> {
    let config = match ReloadConfig::from_project_root() {
        Ok(config) => config.entry_name("dev_server.rs").interval(Duration::from_millis(500)),
        Err(e) => {
            tracing::error!("hot reload disabled: {e}");
            return None;
        }
    };
    let runner = CargoRunner::new().arg("--example").arg("dev_server");
    let mut supervisor = ReloadSupervisor::new(config, server.handle(), runner);
    if let Err(e) = supervisor.start() {
        tracing::error!("hot reload disabled: {e}");
        return None;
    }

    let stop = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    Some(tokio::spawn(supervisor.run_until(stop)))
}

fn add_header(name: &'static str, value: &'static str) -> Middleware {
    Middleware::from_fn(move |req: Request, next: Next| async move {
        let mut res = next.run(req).await;
        res.headers_mut().insert(name, http::HeaderValue::from_static(value));
        res
    })
}

fn require_token() -> Middleware {
    Middleware::from_fn(|req: Request, next: Next| async move {
        if req.header("x-token") != Some("letmein") {
            return Response::status(StatusCode::UNAUTHORIZED);
        }
        next.run(req).await
    })
}

async fn ping(_req: Request) -> Response {
    Response::text("pong")
}

async fn get_user(req: Request) -> Response {
    let id = req.param("id").unwrap_or("unknown");
    Response::json(format!(r#"{{"id":"{id}","name":"alice"}}"#))
}

async fn flush(_req: Request) -> Response {
    Response::status(StatusCode::NO_CONTENT)
}
