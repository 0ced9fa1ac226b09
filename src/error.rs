//! Unified error type.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// The error type returned by trellis' fallible operations.
///
/// Application-level errors (404, 422, etc.) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// operator-facing failures: malformed route registrations, a missing entry
/// point, socket I/O, and reload-cycle shutdown faults.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    /// A registration pattern was not of the form `"<METHOD> <path>"`.
    InvalidPattern { pattern: String, reason: &'static str },
    /// The route table refused the pattern (duplicate or bad syntax).
    Route { pattern: String, source: matchit::InsertError },
    /// No file named `name` exists anywhere under `root`.
    EntryPointNotFound { root: PathBuf, name: String },
    /// Shutdown was requested from a server that has already stopped.
    ServerStopped,
    /// The shutdown-completion signal did not fire in time.
    ShutdownTimedOut(Duration),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::InvalidPattern { pattern, reason } => {
                write!(f, "invalid route pattern `{pattern}`: {reason}")
            }
            Self::Route { pattern, source } => {
                write!(f, "cannot register `{pattern}`: {source}")
            }
            Self::EntryPointNotFound { root, name } => {
                write!(f, "{name} not found under {}", root.display())
            }
            Self::ServerStopped => f.write_str("server is not running"),
            Self::ShutdownTimedOut(after) => {
                write!(f, "server did not confirm shutdown within {after:?}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Route { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
