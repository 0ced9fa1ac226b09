//! HTTP server and graceful shutdown.
//!
//! # Graceful shutdown
//!
//! The server stops on the first of:
//! - **SIGTERM** or **Ctrl-C** delivered to the process;
//! - a request through a [`ServerHandle`], which is how the reload
//!   supervisor takes the server down before respawning.
//!
//! Either way it:
//! 1. Immediately stops `listener.accept()`, so no new connections are made.
//! 2. Closes idle keep-alive connections and lets every in-flight request
//!    finish its response.
//! 3. Fires the completion signal that came with a handle request, if any.
//! 4. Returns from [`Server::serve`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::app::App;
use crate::error::Error;
use crate::reload::GracefulShutdown;
use crate::request::Request;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    shutdown_tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
    shutdown_rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust,no_run
    /// use trellis::Server;
    /// let server = Server::bind("0.0.0.0:3000")?;
    /// # Ok::<(), trellis::Error>(())
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let addr: SocketAddr = addr.parse().map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid socket address `{addr}`: {e}"),
            )
        })?;
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        Ok(Self { addr, shutdown_tx, shutdown_rx })
    }

    /// A handle that can stop this server once it is running.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle { tx: self.shutdown_tx.clone() }
    }

    /// Binds the configured address and serves `app` until shutdown.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_with(listener, app).await
    }

    /// Serves `app` on an already-bound listener until shutdown.
    pub async fn serve_with(self, listener: TcpListener, app: App) -> Result<(), Error> {
        let Server { shutdown_tx, mut shutdown_rx, .. } = self;
        drop(shutdown_tx);

        let app = Arc::new(app);
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "trellis listening");

        let builder = ConnBuilder::new(TokioExecutor::new());
        let graceful = graceful::GracefulShutdown::new();
        let mut tasks = tokio::task::JoinSet::new();

        let signal = os_signal();
        tokio::pin!(signal);
        let mut completion = None;

        loop {
            tokio::select! {
                // Check shutdown before accept so a stop request wins over
                // queued connections.
                biased;

                () = &mut signal => {
                    info!(
                        in_flight = tasks.len(),
                        "shutdown signal received, draining connections"
                    );
                    break;
                }

                Some(done) = shutdown_rx.recv() => {
                    info!(in_flight = tasks.len(), "shutdown requested, draining connections");
                    completion = Some(done);
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    // Called once per request on the connection.
                    let svc = service_fn(move |req| {
                        let app = Arc::clone(&app);
                        async move { dispatch(app, req, remote_addr).await }
                    });
                    let conn = graceful.watch(builder.serve_connection(io, svc).into_owned());

                    tasks.spawn(async move {
                        if let Err(e) = conn.await {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Stop taking further stop requests; their senders are dropped.
        drop(shutdown_rx);
        drop(listener);

        // Idle keep-alive connections close now; busy ones finish their
        // current response first.
        graceful.shutdown().await;
        while tasks.join_next().await.is_some() {}

        info!(addr = %local_addr, "trellis stopped");
        if let Some(done) = completion {
            let _ = done.send(());
        }
        Ok(())
    }
}

// ── ServerHandle ──────────────────────────────────────────────────────────────

/// Requests graceful shutdown of a [`Server`] from elsewhere.
#[derive(Clone, Debug)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl ServerHandle {
    /// Asks the server to stop; `done` fires once it has drained.
    ///
    /// Fails with [`Error::ServerStopped`] if the server is already gone, in
    /// which case `done` is dropped without firing.
    pub fn shutdown(&self, done: oneshot::Sender<()>) -> Result<(), Error> {
        self.tx.send(done).map_err(|_| Error::ServerStopped)
    }

    /// Stops the server and waits for the drain to finish.
    pub async fn stop(&self) -> Result<(), Error> {
        let (done, drained) = oneshot::channel();
        self.shutdown(done)?;
        drained.await.map_err(|_| Error::ServerStopped)
    }
}

impl GracefulShutdown for ServerHandle {
    fn request_shutdown(&self, done: oneshot::Sender<()>) -> Result<(), Error> {
        self.shutdown(done)
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Core hot path: collects one request body and hands it to the app.
///
/// Failures are answered in-band (404, 400, ...), so hyper never sees an error.
async fn dispatch(
    app: Arc<App>,
    req: hyper::Request<hyper::body::Incoming>,
    remote_addr: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (parts, body) = req.into_parts();
    let request = match body.collect().await {
        Ok(collected) => http::Request::from_parts(parts, collected.to_bytes()),
        Err(e) => {
            warn!(peer = %remote_addr, "failed to read request body: {e}");
            let req = http::Request::from_parts(parts, Bytes::new());
            let req = Request::from_http(req, Some(remote_addr));
            return Ok(app.reject(req, http::StatusCode::BAD_REQUEST).await);
        }
    };
    Ok(app.call(Request::from_http(request, Some(remote_addr))).await)
}

// ── OS shutdown signal ────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM or Ctrl-C the process receives.
async fn os_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
