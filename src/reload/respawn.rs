//! Relaunching the serving process.

use std::ffi::OsString;
use std::future::Future;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

/// Starts a fresh serving process and resolves when it exits.
pub trait Respawn: Send + Sync {
    fn respawn(&self, entry_point: &Path) -> impl Future<Output = io::Result<ExitStatus>> + Send;
}

/// Relaunches with `cargo run`, inheriting stdin, stdout and stderr.
///
/// The manifest is the `Cargo.toml` nearest above the entry point. If there
/// is none, `cargo run` runs from the entry point's directory. The child is
/// killed if the supervisor stops while waiting on it.
///
/// The target is inferred from where the entry point sits under the manifest
/// directory, following Cargo's auto-discovery layout:
///
/// | entry point                                  | target             |
/// |----------------------------------------------|--------------------|
/// | `src/main.rs`                                | default binary     |
/// | `src/bin/<name>.rs`, `src/bin/<name>/main.rs` | `--bin <name>`     |
/// | `examples/<name>.rs`, `examples/<name>/main.rs` | `--example <name>` |
///
/// Targets declared with a custom `path` are not inferred; pass
/// `--bin`/`--example` through [`arg`](CargoRunner::arg) instead, which
/// disables inference.
#[derive(Clone, Debug)]
pub struct CargoRunner {
    program: OsString,
    args: Vec<OsString>,
}

impl CargoRunner {
    pub fn new() -> Self {
        Self { program: OsString::from("cargo"), args: Vec::new() }
    }

    /// Overrides the toolchain binary, e.g. a pinned `cargo` path.
    pub fn program(mut self, program: impl Into<OsString>) -> Self {
        self.program = program.into();
        self
    }

    /// Appends an argument after `cargo run` and the manifest path.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// The command [`respawn`](Respawn::respawn) would run for `entry_point`.
    pub fn command(&self, entry_point: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("run");

        let manifest = entry_point
            .ancestors()
            .skip(1)
            .map(|dir| dir.join("Cargo.toml"))
            .find(|manifest| manifest.is_file());
        match manifest {
            Some(manifest) => {
                let target = manifest
                    .parent()
                    .and_then(|dir| entry_point.strip_prefix(dir).ok())
                    .and_then(target_for);
                cmd.arg("--manifest-path").arg(&manifest);
                if let (Some((flag, name)), false) = (target, self.names_target()) {
                    cmd.arg(flag).arg(name);
                }
            }
            None => {
                if let Some(dir) = entry_point.parent() {
                    cmd.current_dir(dir);
                }
            }
        }
        cmd.args(&self.args);

        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        cmd
    }

    fn names_target(&self) -> bool {
        self.args.iter().any(|arg| arg == "--bin" || arg == "--example")
    }
}

impl Default for CargoRunner {
    fn default() -> Self { Self::new() }
}

impl Respawn for CargoRunner {
    fn respawn(&self, entry_point: &Path) -> impl Future<Output = io::Result<ExitStatus>> + Send {
        let mut cmd = self.command(entry_point);
        async move { cmd.status().await }
    }
}

/// Maps an entry point relative to its manifest directory to a target flag.
fn target_for(relative: &Path) -> Option<(&'static str, String)> {
    let parts: Vec<&str> = relative.iter().filter_map(|part| part.to_str()).collect();
    let (flag, rest) = match parts.as_slice() {
        ["src", "bin", rest @ ..] => ("--bin", rest),
        ["examples", rest @ ..] => ("--example", rest),
        _ => return None,
    };
    let name = match rest {
        [file] => file.strip_suffix(".rs")?,
        [dir, "main.rs"] => *dir,
        _ => return None,
    };
    Some((flag, name.to_owned()))
}
