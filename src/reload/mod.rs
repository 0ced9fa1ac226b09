//! Development-time hot reload.
//!
//! A [`ReloadSupervisor`] polls a source tree. When a source file changes it
//! stops the running server, waits for the server to confirm it has drained,
//! then relaunches the application and waits for that process to exit before
//! watching again.
//!
//! ```text
//!  Idle ──start──▶ Watching ──change──▶ ShuttingDown ──drained──▶ Respawning
//!   │                 ▲                       │                       │
//!   ▼                 └──── timed out ────────┘◀──── child exited ────┘
//! EntryPointNotFound
//! ```
//!
//! ```rust,no_run
//! use trellis::reload::{CargoRunner, ReloadConfig, ReloadSupervisor};
//! use trellis::Server;
//!
//! # async fn run() -> Result<(), trellis::Error> {
//! let server = Server::bind("127.0.0.1:3000")?;
//! let config = ReloadConfig::from_project_root()?;
//! let supervisor = ReloadSupervisor::new(config, server.handle(), CargoRunner::new());
//! tokio::spawn(supervisor.run());
//! # Ok(())
//! # }
//! ```

mod fs;
mod respawn;

pub use fs::{find_entry_point, first_modified_since, project_root};
pub use respawn::{CargoRunner, Respawn};

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::error::Error;

/// A server the supervisor can take down.
pub trait GracefulShutdown: Send + Sync {
    /// Asks the server to stop accepting connections and drain. `done` must
    /// fire once it has. If the request fails, `done` is dropped unfired.
    fn request_shutdown(&self, done: oneshot::Sender<()>) -> Result<(), Error>;
}

/// What to do while the server has not confirmed shutdown.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ShutdownPolicy {
    /// Wait for the confirmation forever. A server that cannot shut down
    /// stalls the supervisor, but nothing is ever started on a port that may
    /// still be bound.
    Wait,
    /// Give up after the duration: the cycle is abandoned without
    /// respawning and watching resumes.
    Timeout(Duration),
}

impl Default for ShutdownPolicy {
    fn default() -> Self {
        Self::Timeout(Duration::from_secs(30))
    }
}

/// Supervisor settings.
#[derive(Clone, Debug)]
pub struct ReloadConfig {
    /// Tree to watch and to search for the entry point.
    pub source_root: PathBuf,
    /// Poll spacing, and the minimum age of the last checkpoint before a walk.
    pub interval: Duration,
    /// Extension of files that trigger a reload, without the dot.
    pub extension: String,
    /// File name of the entry point.
    pub entry_name: String,
    /// Directory names never descended into.
    pub ignore: Vec<String>,
    pub shutdown: ShutdownPolicy,
}

impl ReloadConfig {
    pub fn new(source_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            interval: Duration::from_secs(1),
            extension: "rs".to_owned(),
            entry_name: "main.rs".to_owned(),
            ignore: vec!["target".to_owned(), ".git".to_owned()],
            shutdown: ShutdownPolicy::default(),
        }
    }

    /// Watches the enclosing cargo project of the working directory.
    pub fn from_project_root() -> Result<Self, Error> {
        Ok(Self::new(project_root()?))
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn entry_name(mut self, name: impl Into<String>) -> Self {
        self.entry_name = name.into();
        self
    }

    pub fn ignore(mut self, dir_name: impl Into<String>) -> Self {
        self.ignore.push(dir_name.into());
        self
    }

    pub fn shutdown(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown = policy;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReloadState {
    Idle,
    Watching,
    ShuttingDown,
    Respawning,
}

/// Polls a source tree and cycles the server when it changes.
pub struct ReloadSupervisor<S, R = CargoRunner> {
    config: ReloadConfig,
    server: S,
    respawner: R,
    last_check: SystemTime,
    entry_point: Option<PathBuf>,
    state: ReloadState,
}

impl<S: GracefulShutdown, R: Respawn> ReloadSupervisor<S, R> {
    /// The checkpoint starts at the current time, so only files modified
    /// after construction trigger a reload.
    pub fn new(config: ReloadConfig, server: S, respawner: R) -> Self {
        Self {
            config,
            server,
            respawner,
            last_check: SystemTime::now(),
            entry_point: None,
            state: ReloadState::Idle,
        }
    }

    pub fn state(&self) -> ReloadState {
        self.state
    }

    pub fn last_check_time(&self) -> SystemTime {
        self.last_check
    }

    pub fn entry_point(&self) -> Option<&Path> {
        self.entry_point.as_deref()
    }

    pub fn config(&self) -> &ReloadConfig {
        &self.config
    }

    /// Locates the entry point and begins watching.
    pub fn start(&mut self) -> Result<&Path, Error> {
        let config = &self.config;
        let entry = find_entry_point(&config.source_root, &config.entry_name, &config.ignore)
            .ok_or_else(|| Error::EntryPointNotFound {
                root: config.source_root.clone(),
                name: config.entry_name.clone(),
            })?;
        info!(
            entry = %entry.display(),
            root = %config.source_root.display(),
            "waiting for file changes"
        );
        self.state = ReloadState::Watching;
        Ok(self.entry_point.insert(entry).as_path())
    }

    /// Runs until the process exits. See [`run_until`](Self::run_until).
    pub async fn run(self) -> Result<(), Error> {
        self.run_until(std::future::pending()).await
    }

    /// Polls every `interval` until `stop` resolves.
    ///
    /// Returns an error only if the entry point cannot be found. Failures
    /// inside a cycle are logged and watching continues. Resolving `stop`
    /// mid-cycle abandons the cycle and kills a respawned child.
    pub async fn run_until(mut self, stop: impl Future<Output = ()>) -> Result<(), Error> {
        self.start()?;
        tokio::pin!(stop);

        let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = &mut stop => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                () = &mut stop => break,
                res = self.tick_at(SystemTime::now()) => {
                    if let Err(e) = res {
                        error!("reload cycle failed: {e}");
                    }
                }
            }
        }

        info!("reload supervisor stopped");
        Ok(())
    }

    /// One poll, as if the clock read `now`.
    ///
    /// Walks the tree only if at least `interval` has passed since the
    /// checkpoint. The first changed source file found moves the checkpoint
    /// to `now` and runs one reload cycle; the walk stops there, so any
    /// number of changed files costs a single cycle. Returns whether a cycle
    /// ran. A failed walk is logged and reported as no change.
    pub async fn tick_at(&mut self, now: SystemTime) -> Result<bool, Error> {
        let entry_point = match self.entry_point.clone() {
            Some(entry) => entry,
            None => self.start()?.to_path_buf(),
        };

        let due = now
            .duration_since(self.last_check)
            .is_ok_and(|elapsed| elapsed >= self.config.interval);
        if !due {
            return Ok(false);
        }

        let changed = match self.scan().await {
            Ok(Some(path)) => path,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(root = %self.config.source_root.display(), "error walking source tree: {e}");
                return Ok(false);
            }
        };

        info!(file = %changed.display(), "source file modified");
        self.last_check = now;
        self.reload(&entry_point).await?;
        Ok(true)
    }

    async fn scan(&self) -> std::io::Result<Option<PathBuf>> {
        let root = self.config.source_root.clone();
        let extension = self.config.extension.clone();
        let ignore = self.config.ignore.clone();
        let since = self.last_check;

        tokio::task::spawn_blocking(move || first_modified_since(&root, &extension, since, &ignore))
            .await
            .map_err(std::io::Error::other)?
    }

    async fn reload(&mut self, entry_point: &Path) -> Result<(), Error> {
        self.state = ReloadState::ShuttingDown;
        if let Err(e) = self.stop_server().await {
            self.state = ReloadState::Watching;
            return Err(e);
        }

        self.state = ReloadState::Respawning;
        info!(entry = %entry_point.display(), "reloading application");
        match self.respawner.respawn(entry_point).await {
            Ok(status) if status.success() => info!(%status, "application exited"),
            Ok(status) => error!(%status, "restarted application failed"),
            Err(e) => error!("failed to restart application: {e}"),
        }

        self.state = ReloadState::Watching;
        Ok(())
    }

    /// Requests shutdown and waits for the one-shot completion signal.
    async fn stop_server(&self) -> Result<(), Error> {
        let (done, drained) = oneshot::channel();
        if let Err(e) = self.server.request_shutdown(done) {
            error!("error stopping server: {e}");
        }

        // A dropped sender means the signal will never fire.
        let confirmed = async {
            if drained.await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        match self.config.shutdown {
            ShutdownPolicy::Wait => {
                confirmed.await;
                Ok(())
            }
            ShutdownPolicy::Timeout(limit) => tokio::time::timeout(limit, confirmed)
                .await
                .map_err(|_| Error::ShutdownTimedOut(limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io;
    use std::process::ExitStatus;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use super::*;

    #[derive(Clone, Default)]
    struct FakeServer {
        requests: Arc<AtomicUsize>,
        stuck: bool,
    }

    impl GracefulShutdown for FakeServer {
        fn request_shutdown(&self, done: oneshot::Sender<()>) -> Result<(), Error> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            if self.stuck {
                return Err(Error::ServerStopped);
            }
            let _ = done.send(());
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct FakeRunner {
        spawned: Arc<AtomicUsize>,
    }

    impl Respawn for FakeRunner {
        fn respawn(
            &self,
            _entry_point: &Path,
        ) -> impl Future<Output = io::Result<ExitStatus>> + Send {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(ExitStatus::default()))
        }
    }

    fn set_mtime(path: &Path, at: SystemTime) {
        fs::File::options().write(true).open(path).unwrap().set_modified(at).unwrap();
    }

    /// A project with `src/main.rs` and `src/lib.rs`, both dated a minute ago.
    fn project() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        let past = SystemTime::now() - Duration::from_secs(60);
        for name in ["src/main.rs", "src/lib.rs"] {
            let path = dir.path().join(name);
            fs::write(&path, "").unwrap();
            set_mtime(&path, past);
        }
        dir
    }

    fn supervisor(
        dir: &TempDir,
        server: FakeServer,
        runner: FakeRunner,
    ) -> ReloadSupervisor<FakeServer, FakeRunner> {
        let config = ReloadConfig::new(dir.path())
            .interval(Duration::from_secs(1))
            .shutdown(ShutdownPolicy::Timeout(Duration::from_millis(50)));
        ReloadSupervisor::new(config, server, runner)
    }

    #[test]
    fn start_fails_without_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let mut sup = supervisor(&dir, FakeServer::default(), FakeRunner::default());
        let err = sup.start().unwrap_err();
        assert!(matches!(err, Error::EntryPointNotFound { ref name, .. } if name == "main.rs"));
        assert_eq!(sup.state(), ReloadState::Idle);
    }

    #[test]
    fn start_finds_entry_point_and_watches() {
        let dir = project();
        let mut sup = supervisor(&dir, FakeServer::default(), FakeRunner::default());
        assert_eq!(sup.start().unwrap(), dir.path().join("src/main.rs"));
        assert_eq!(sup.state(), ReloadState::Watching);
    }

    #[tokio::test]
    async fn touched_file_triggers_exactly_one_cycle() {
        let dir = project();
        let (server, runner) = (FakeServer::default(), FakeRunner::default());
        let mut sup = supervisor(&dir, server.clone(), runner.clone());
        sup.start().unwrap();

        let checkpoint = sup.last_check_time();
        set_mtime(&dir.path().join("src/lib.rs"), checkpoint + Duration::from_secs(5));
        set_mtime(&dir.path().join("src/main.rs"), checkpoint + Duration::from_secs(5));

        let tick = checkpoint + Duration::from_secs(1);
        assert!(sup.tick_at(tick).await.unwrap());
        assert_eq!(server.requests.load(Ordering::SeqCst), 1);
        assert_eq!(runner.spawned.load(Ordering::SeqCst), 1);
        assert_eq!(sup.last_check_time(), tick);
        assert_eq!(sup.state(), ReloadState::Watching);
    }

    #[tokio::test]
    async fn no_walk_before_interval_elapses() {
        let dir = project();
        let runner = FakeRunner::default();
        let mut sup = supervisor(&dir, FakeServer::default(), runner.clone());
        sup.start().unwrap();

        let checkpoint = sup.last_check_time();
        set_mtime(&dir.path().join("src/lib.rs"), checkpoint + Duration::from_secs(5));

        assert!(!sup.tick_at(checkpoint + Duration::from_millis(500)).await.unwrap());
        assert_eq!(runner.spawned.load(Ordering::SeqCst), 0);
        assert_eq!(sup.last_check_time(), checkpoint);
    }

    #[tokio::test]
    async fn unchanged_tree_does_nothing() {
        let dir = project();
        let runner = FakeRunner::default();
        let mut sup = supervisor(&dir, FakeServer::default(), runner.clone());
        sup.start().unwrap();

        let checkpoint = sup.last_check_time();
        assert!(!sup.tick_at(checkpoint + Duration::from_secs(2)).await.unwrap());
        assert_eq!(runner.spawned.load(Ordering::SeqCst), 0);
        assert_eq!(sup.last_check_time(), checkpoint);
    }

    #[tokio::test]
    async fn changes_in_ignored_dirs_are_skipped() {
        let dir = project();
        let runner = FakeRunner::default();
        let mut sup = supervisor(&dir, FakeServer::default(), runner.clone());
        sup.start().unwrap();

        fs::create_dir_all(dir.path().join("target/debug/build")).unwrap();
        let generated = dir.path().join("target/debug/build/out.rs");
        fs::write(&generated, "").unwrap();
        set_mtime(&generated, sup.last_check_time() + Duration::from_secs(5));

        assert!(!sup.tick_at(sup.last_check_time() + Duration::from_secs(2)).await.unwrap());
        assert_eq!(runner.spawned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn walk_error_abandons_the_tick() {
        let dir = project();
        let runner = FakeRunner::default();
        let mut sup = supervisor(&dir, FakeServer::default(), runner.clone());
        sup.start().unwrap();

        fs::remove_dir_all(dir.path().join("src")).unwrap();
        fs::remove_dir(dir.path()).unwrap();

        assert!(!sup.tick_at(sup.last_check_time() + Duration::from_secs(2)).await.unwrap());
        assert_eq!(runner.spawned.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unconfirmed_shutdown_skips_respawn() {
        let dir = project();
        let server = FakeServer { stuck: true, ..FakeServer::default() };
        let runner = FakeRunner::default();
        let mut sup = supervisor(&dir, server.clone(), runner.clone());
        sup.start().unwrap();

        let checkpoint = sup.last_check_time();
        set_mtime(&dir.path().join("src/lib.rs"), checkpoint + Duration::from_secs(5));

        let tick = checkpoint + Duration::from_secs(1);
        let err = sup.tick_at(tick).await.unwrap_err();
        assert!(matches!(err, Error::ShutdownTimedOut(_)));
        assert_eq!(server.requests.load(Ordering::SeqCst), 1);
        assert_eq!(runner.spawned.load(Ordering::SeqCst), 0);
        assert_eq!(sup.last_check_time(), tick);
        assert_eq!(sup.state(), ReloadState::Watching);
    }

    #[tokio::test]
    async fn run_until_stops_on_request() {
        let dir = project();
        let sup = supervisor(&dir, FakeServer::default(), FakeRunner::default());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(sup.run_until(async {
            let _ = stop_rx.await;
        }));
        stop_tx.send(()).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn run_until_fails_fast_without_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(&dir, FakeServer::default(), FakeRunner::default());
        let err = sup.run_until(std::future::pending()).await.unwrap_err();
        assert!(matches!(err, Error::EntryPointNotFound { .. }));
    }
}
