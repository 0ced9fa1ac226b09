//! Per-request access logging.
//!
//! [`RequestLogger::around`] wraps the dispatch of one request: it starts a
//! clock, lets the route table produce a response, streams that response
//! through a [`StatusCapture`] and emits exactly one access record.
//!
//! Two output modes, picked once in [`LoggerConfig`]:
//!
//! ```text
//! Colorized  [2026/10/17 09:14:03] 200 | GET | /api/ping?x=1 | 84.00µs | 127.0.0.1
//! Json       {"timestamp":"2026/10/17 09:14:03","level":"INFO","status":"200",...}
//! ```
//!
//! Records go to a [`LogSink`]. [`TracingSink`] forwards them to `tracing`
//! under the `trellis::access` target; [`MemorySink`] keeps them in memory.

use std::future::Future;
use std::net::IpAddr;
use std::panic::Location;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use console::style;
use http::{Method, StatusCode};
use http_body_util::Full;
use serde::Serialize;
use tracing::Level;

use crate::request::Request;
use crate::response::Response;
use crate::sink::{HyperSink, StatusCapture};

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum LogFormat {
    /// One pipe-separated, ANSI-coloured line per request.
    #[default]
    Colorized,
    /// One JSON object per request.
    Json,
}

/// Access-log settings, fixed when the [`RequestLogger`] is built.
#[derive(Clone, Copy, Debug)]
pub struct LoggerConfig {
    pub format: LogFormat,
    /// Most verbose level that is still emitted.
    pub level: Level,
    /// Attach the `[file:line]` where the logger was constructed.
    pub caller: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self { format: LogFormat::Colorized, level: Level::INFO, caller: false }
    }
}

impl LoggerConfig {
    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn caller(mut self, enabled: bool) -> Self {
        self.caller = enabled;
        self
    }
}

// ── Sinks ─────────────────────────────────────────────────────────────────────

/// Accepts finished, leveled log lines.
pub trait LogSink: Send + Sync {
    fn emit(&self, level: Level, line: &str);
}

impl<T: LogSink + ?Sized> LogSink for Arc<T> {
    fn emit(&self, level: Level, line: &str) {
        (**self).emit(level, line)
    }
}

/// Forwards lines to the installed `tracing` subscriber.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn emit(&self, level: Level, line: &str) {
        if level == Level::ERROR {
            tracing::error!(target: "trellis::access", "{line}");
        } else if level == Level::WARN {
            tracing::warn!(target: "trellis::access", "{line}");
        } else if level == Level::INFO {
            tracing::info!(target: "trellis::access", "{line}");
        } else if level == Level::DEBUG {
            tracing::debug!(target: "trellis::access", "{line}");
        } else {
            tracing::trace!(target: "trellis::access", "{line}");
        }
    }
}

/// Keeps every line in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<(Level, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines emitted so far, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lock().iter().map(|(_, line)| line.clone()).collect()
    }

    pub fn entries(&self) -> Vec<(Level, String)> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(Level, String)>> {
        // A panic while holding the lock cannot leave the Vec half-written.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for MemorySink {
    fn emit(&self, level: Level, line: &str) {
        self.lock().push((level, line.to_owned()));
    }
}

// ── Access entry ──────────────────────────────────────────────────────────────

/// What is known about one finished request.
#[derive(Clone, Debug)]
pub struct AccessEntry {
    pub status: StatusCode,
    pub method: Method,
    /// Path with the query string appended when present.
    pub path: String,
    pub elapsed: Duration,
    /// Peer address without its port.
    pub remote_addr: Option<IpAddr>,
}

#[derive(Serialize)]
struct AccessRecord<'a> {
    timestamp: String,
    level: &'static str,
    status: String,
    method: &'a str,
    path: &'a str,
    response_time: String,
    remote_addr: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caller: Option<String>,
}

/// Formats a request duration for the access log.
///
/// Under one millisecond: microseconds. Otherwise: milliseconds. Always two
/// decimals.
pub fn format_response_time(elapsed: Duration) -> String {
    let nanos = elapsed.as_nanos() as f64;
    if elapsed < Duration::from_millis(1) {
        format!("{:.2}µs", nanos / 1_000.0)
    } else {
        format!("{:.2}ms", nanos / 1_000_000.0)
    }
}

// ── RequestLogger ─────────────────────────────────────────────────────────────

/// Emits one access record per request.
///
/// Safe to share across concurrently running requests; the only mutable
/// state lives in the sink.
pub struct RequestLogger {
    config: LoggerConfig,
    sink: Box<dyn LogSink>,
    caller: &'static Location<'static>,
}

impl RequestLogger {
    #[track_caller]
    pub fn new(config: LoggerConfig, sink: impl LogSink + 'static) -> Self {
        Self { config, sink: Box::new(sink), caller: Location::caller() }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    /// Runs `dispatch` for `req`, logs the outcome and returns the response
    /// ready for hyper.
    pub async fn around<F, Fut>(&self, req: Request, dispatch: F) -> http::Response<Full<Bytes>>
    where
        F: FnOnce(Request) -> Fut,
        Fut: Future<Output = Response>,
    {
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.path_and_query();
        let remote_addr = req.remote_addr().map(|addr| addr.ip());

        let response = dispatch(req).await;

        let mut capture = StatusCapture::new(HyperSink::new());
        response.write_to(&mut capture);
        let elapsed = start.elapsed();

        self.log(&AccessEntry { status: capture.status(), method, path, elapsed, remote_addr });
        capture.into_inner().into_response()
    }

    /// Emits the record for one finished request at `INFO`.
    pub fn log(&self, entry: &AccessEntry) {
        let level = Level::INFO;
        if level > self.config.level {
            return;
        }
        let line = match self.config.format {
            LogFormat::Colorized => self.colorized(entry),
            LogFormat::Json => self.json(level, entry),
        };
        self.sink.emit(level, &line);
    }

    fn colorized(&self, entry: &AccessEntry) -> String {
        let status = entry.status.as_u16().to_string();
        let status = match entry.status.as_u16() {
            200..=299 => style(status).green(),
            400..=499 => style(status).yellow(),
            500.. => style(status).red(),
            _ => style(status),
        };
        let fields = [
            status.force_styling(true).to_string(),
            style(entry.method.as_str()).cyan().force_styling(true).to_string(),
            style(&entry.path).green().force_styling(true).to_string(),
            style(format_response_time(entry.elapsed)).magenta().force_styling(true).to_string(),
            style(remote_addr(entry)).yellow().force_styling(true).to_string(),
        ];

        let timestamp = format!("[{}]", chrono::Local::now().format(TIMESTAMP_FORMAT));
        let mut line = format!(
            "{} {}",
            style(timestamp).blue().force_styling(true),
            fields.join(" | ")
        );
        if self.config.caller {
            line = format!("{} {line}", style(self.caller_info()).dim().force_styling(true));
        }
        line
    }

    fn json(&self, level: Level, entry: &AccessEntry) -> String {
        let record = AccessRecord {
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            level: level.as_str(),
            status: entry.status.as_u16().to_string(),
            method: entry.method.as_str(),
            path: &entry.path,
            response_time: format_response_time(entry.elapsed),
            remote_addr: remote_addr(entry),
            caller: self.config.caller.then(|| self.caller_info()),
        };
        serde_json::to_string(&record)
            .unwrap_or_else(|e| format!("failed to encode access record: {e}"))
    }

    fn caller_info(&self) -> String {
        let file = Path::new(self.caller.file())
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| self.caller.file().into());
        format!("[{file}:{}]", self.caller.line())
    }
}

fn remote_addr(entry: &AccessEntry) -> String {
    entry.remote_addr.map(|ip| ip.to_string()).unwrap_or_default()
}
