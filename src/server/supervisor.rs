//! Server Process Supervision
//!
//! Owns the lifecycle of one local server process: builds the command
//! line, spawns it, streams its merged stdout/stderr through the log
//! sink, flips status to running when the server reports its URL, and
//! tears the process down on demand.
//!
//! At most one process is supervised at a time. All subprocess and OS
//! failures are converted into [`ServerStatus::Error`] and logged;
//! nothing here propagates a fault to the caller of [`Supervisor::launch`]
//! or [`Supervisor::stop`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use comfybridge::server::{ServerConfig, ServerStatus, Supervisor};
//!
//! let supervisor = Supervisor::new(ServerConfig::from_env());
//! supervisor.launch();
//!
//! match supervisor.wait_until_ready(Duration::from_secs(60)) {
//!     ServerStatus::Running => println!("ready at {:?}", supervisor.server_url()),
//!     status => eprintln!("server did not come up: {}", status),
//! }
//!
//! supervisor.stop(Duration::from_secs(10));
//! ```

use std::fmt;
use std::io::{self, BufRead, BufReader};
use std::panic::{self, AssertUnwindSafe};
use std::process::{Child, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::config::ServerConfig;
use super::readiness::find_server_url;

/// Pause after spawning so immediate child failures surface as an
/// error before `launch` returns.
const STARTUP_GRACE: Duration = Duration::from_millis(200);

/// Upper bound between liveness polls inside `wait_until_ready`.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between exit polls inside `stop`.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Timeout used when the supervisor is dropped with a live child.
const DROP_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// UI-facing lifecycle status of the supervised server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    /// No launch has been attempted yet.
    Idle,
    /// The process has been (or is being) spawned and has not yet
    /// reported its URL.
    Launching,
    /// The server reported a URL and is accepting connections.
    Running,
    /// A launch was requested while a live process already existed.
    AlreadyRunning,
    /// The command could not be built, the spawn failed, or the child
    /// exited before becoming ready.
    Error,
    /// The process exited or was stopped.
    Stopped,
}

impl ServerStatus {
    /// True once a launch attempt has settled one way or the other.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ServerStatus::Running | ServerStatus::AlreadyRunning | ServerStatus::Error
        )
    }

    /// True while a launch is in flight. The menu toggle is disabled
    /// in this state.
    pub fn is_busy(self) -> bool {
        matches!(self, ServerStatus::Launching)
    }

    /// Label for the host menu toggle command.
    pub fn menu_label(self) -> &'static str {
        match self {
            ServerStatus::Idle | ServerStatus::Stopped => "Launch Local Server",
            ServerStatus::Launching => "Launching Local Server...",
            ServerStatus::Running | ServerStatus::AlreadyRunning => "Stop Local Server",
            ServerStatus::Error => "Launch Local Server (last launch failed)",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ServerStatus::Idle => "idle",
            ServerStatus::Launching => "launching",
            ServerStatus::Running => "running",
            ServerStatus::AlreadyRunning => "already running",
            ServerStatus::Error => "error",
            ServerStatus::Stopped => "stopped",
        };
        write!(f, "{}", text)
    }
}

/// Single-slot status observer. May be invoked from the reader thread;
/// UI observers are responsible for marshalling to their own thread.
type StatusListener = Arc<dyn Fn(ServerStatus) + Send + Sync + 'static>;

/// State protected by the supervisor's single exclusion lock.
struct Shared {
    child: Option<Child>,
    status: ServerStatus,
    url: Option<String>,
}

impl Shared {
    /// Polls whether the supervised child is still alive.
    fn child_is_live(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(_)) => false,
                Err(e) => {
                    warn!("Failed to poll server process: {}", e);
                    false
                }
            },
            None => false,
        }
    }

    /// Takes and reaps an exited child, returning its exit status text.
    fn reap_child(&mut self) -> Option<String> {
        let mut child = self.child.take()?;
        match child.wait() {
            Ok(status) => Some(status.to_string()),
            Err(e) => {
                warn!("Failed to reap server process: {}", e);
                None
            }
        }
    }
}

/// Supervises a single local server process.
///
/// Construct one per host session, register a status listener for the
/// menu, and stop it from the host's teardown callback so an abrupt
/// exit never leaves an orphaned child behind (dropping the supervisor
/// does the same).
pub struct Supervisor {
    config: ServerConfig,
    shared: Arc<(Mutex<Shared>, Condvar)>,
    listener: Arc<Mutex<Option<StatusListener>>>,
}

impl Supervisor {
    /// Creates an idle supervisor for the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            shared: Arc::new((
                Mutex::new(Shared {
                    child: None,
                    status: ServerStatus::Idle,
                    url: None,
                }),
                Condvar::new(),
            )),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers the status listener, replacing any previous one.
    ///
    /// The listener receives every status transition, outside the
    /// supervisor's state lock, possibly from a background thread.
    pub fn set_status_listener(&self, listener: impl Fn(ServerStatus) + Send + Sync + 'static) {
        *lock_or_recover(&self.listener) = Some(Arc::new(listener));
    }

    /// Current status.
    pub fn status(&self) -> ServerStatus {
        lock_or_recover(&self.shared.0).status
    }

    /// URL the server reported, once running.
    pub fn server_url(&self) -> Option<String> {
        lock_or_recover(&self.shared.0).url.clone()
    }

    /// PID of the live child, if any.
    pub fn pid(&self) -> Option<u32> {
        lock_or_recover(&self.shared.0).child.as_ref().map(Child::id)
    }

    /// Launches the server process in the background.
    ///
    /// Idempotent: a live process reports `AlreadyRunning` and nothing
    /// else happens. Build and spawn failures end in `Error`; neither
    /// is raised to the caller.
    pub fn launch(&self) {
        {
            let mut shared = lock_or_recover(&self.shared.0);
            if shared.child_is_live() {
                info!("Server already running");
                drop(shared);
                self.set_status(ServerStatus::AlreadyRunning);
                return;
            }
            shared.url = None;
        }

        // Observers see progress before the spawn completes.
        self.set_status(ServerStatus::Launching);

        let launch = match self.config.build_command() {
            Ok(launch) => launch,
            Err(e) => {
                error!("Failed to build server command: {}", e);
                self.set_status(ServerStatus::Error);
                return;
            }
        };

        info!("Launching: {}", launch);

        // One anonymous pipe carries both stdout and stderr so a single
        // reader thread sees the merged stream in order.
        let (pipe_reader, stdout_writer, stderr_writer) = match merged_output_pipe() {
            Ok(pipes) => pipes,
            Err(e) => {
                error!("Failed to set up server output pipe: {}", e);
                self.set_status(ServerStatus::Error);
                return;
            }
        };

        let mut command = launch.command();
        command
            .stdin(Stdio::null())
            .stdout(stdout_writer)
            .stderr(stderr_writer);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to launch server (interpreter not found?): {}", e);
                self.set_status(ServerStatus::Error);
                return;
            }
        };

        // The command still holds write ends of the pipe; drop it now
        // or the reader never sees EOF when the child exits.
        drop(command);

        let pid = child.id();
        lock_or_recover(&self.shared.0).child = Some(child);

        let shared = Arc::clone(&self.shared);
        let listener = Arc::clone(&self.listener);
        thread::spawn(move || reader_loop(pipe_reader, shared, listener));

        // Let immediate failures (missing dependency inside the child,
        // bad entry script) surface before control returns.
        thread::sleep(STARTUP_GRACE);

        let early_exit = {
            let mut shared = lock_or_recover(&self.shared.0);
            if shared.child_is_live() {
                None
            } else {
                Some(shared.reap_child())
            }
        };

        if let Some(exit) = early_exit {
            error!(
                "Server exited immediately ({})",
                exit.unwrap_or_else(|| "unknown exit status".to_string())
            );
            self.set_status(ServerStatus::Error);
            return;
        }

        info!("Server process started (pid {}). Waiting for URL...", pid);
    }

    /// Blocks the calling thread until the launch settles or the
    /// timeout elapses.
    ///
    /// Wakes on status-change signals with a bounded poll interval (no
    /// busy spin) and also polls child liveness, so a child that dies
    /// before reporting a URL yields `Error` without waiting out the
    /// timeout. Returns the terminal status, or the last observed
    /// status if the timeout elapses first. Must not be called from
    /// the thread that renders the UI.
    pub fn wait_until_ready(&self, timeout: Duration) -> ServerStatus {
        let deadline = Instant::now() + timeout;
        let (lock, cvar) = &*self.shared;
        let mut shared = lock_or_recover(lock);

        loop {
            if shared.status.is_terminal() {
                return shared.status;
            }

            if shared.status == ServerStatus::Launching && !shared.child_is_live() {
                let exit = shared.reap_child();
                shared.status = ServerStatus::Error;
                drop(shared);
                cvar.notify_all();
                error!(
                    "Server exited before reporting a URL ({})",
                    exit.unwrap_or_else(|| "unknown exit status".to_string())
                );
                self.notify_listener(ServerStatus::Error);
                return ServerStatus::Error;
            }

            let now = Instant::now();
            if now >= deadline {
                return shared.status;
            }

            let wait = WAIT_POLL_INTERVAL.min(deadline - now);
            shared = match cvar.wait_timeout(shared, wait) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Stops the supervised process.
    ///
    /// Idempotent: with no live process this only settles the status.
    /// Otherwise requests graceful termination, polls for exit up to
    /// `timeout`, then force-kills. The handle is cleared and status
    /// set to `Stopped` on every path out of this function.
    pub fn stop(&self, timeout: Duration) {
        let child = lock_or_recover(&self.shared.0).child.take();

        if let Some(mut child) = child {
            let pid = child.id();
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Server process already exited ({})", status);
                }
                Ok(None) | Err(_) => {
                    info!("Stopping server (pid {})", pid);
                    request_graceful_exit(pid);

                    let deadline = Instant::now() + timeout;
                    let mut exited = false;
                    while Instant::now() < deadline {
                        match child.try_wait() {
                            Ok(Some(status)) => {
                                info!("Server exited ({})", status);
                                exited = true;
                                break;
                            }
                            Ok(None) => thread::sleep(STOP_POLL_INTERVAL),
                            Err(e) => {
                                warn!("Failed to poll server during stop: {}", e);
                                break;
                            }
                        }
                    }

                    if !exited {
                        warn!("Server did not exit within {:?}, killing", timeout);
                        if let Err(e) = child.kill() {
                            warn!("Failed to kill server process: {}", e);
                        }
                        if let Err(e) = child.wait() {
                            warn!("Failed to reap server process: {}", e);
                        }
                    }
                }
            }
        }

        // The handle was taken above, so even a failed termination
        // cannot leave a live handle behind.
        self.set_status(ServerStatus::Stopped);
    }

    /// Host-teardown hook: stop the child before the host exits.
    pub fn shutdown(&self) {
        self.stop(DROP_STOP_TIMEOUT);
    }

    /// Sets the status under the lock, wakes waiters, and invokes the
    /// listener outside the lock so observer code may re-enter the
    /// supervisor.
    fn set_status(&self, status: ServerStatus) {
        let (lock, cvar) = &*self.shared;
        lock_or_recover(lock).status = status;
        cvar.notify_all();
        self.notify_listener(status);
    }

    fn notify_listener(&self, status: ServerStatus) {
        invoke_listener(&self.listener, status);
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        let live = lock_or_recover(&self.shared.0).child.is_some();
        if live {
            self.stop(DROP_STOP_TIMEOUT);
        }
    }
}

/// Asks the child to exit gracefully before it gets force-killed.
///
/// Unix: a plain `kill` delivers SIGTERM so the server can shut down
/// its own workers. Elsewhere there is no portable graceful request,
/// so `stop` proceeds straight to the kill path.
#[cfg(unix)]
fn request_graceful_exit(pid: u32) {
    match std::process::Command::new("kill").arg(pid.to_string()).status() {
        Ok(status) if status.success() => debug!("Sent SIGTERM to pid {}", pid),
        Ok(status) => warn!("kill exited with {} for pid {}", status, pid),
        Err(e) => warn!("Failed to signal pid {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn request_graceful_exit(_pid: u32) {}

/// Creates the pipe carrying the child's merged stdout and stderr.
fn merged_output_pipe() -> io::Result<(io::PipeReader, Stdio, Stdio)> {
    let (reader, writer) = io::pipe()?;
    let stderr_writer = writer.try_clone()?;
    Ok((reader, Stdio::from(writer), Stdio::from(stderr_writer)))
}

/// Consumes the child's merged output line by line.
///
/// Every line is forwarded to the log sink with a stream tag. The
/// first line containing a served URL flips `Launching` to `Running`;
/// detection is not re-armed afterwards. On EOF (child exited or pipe
/// closed) the status settles: a child that never reported a URL is an
/// error, anything else that is not already `Error`/`AlreadyRunning`
/// becomes `Stopped`.
fn reader_loop(
    pipe: io::PipeReader,
    shared: Arc<(Mutex<Shared>, Condvar)>,
    listener: Arc<Mutex<Option<StatusListener>>>,
) {
    let reader = BufReader::new(pipe);
    let mut url_seen = false;

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Server output read failed: {}", e);
                break;
            }
        };

        info!("[comfyui:out] {}", line);

        if !url_seen {
            if let Some(url) = find_server_url(&line) {
                url_seen = true;
                info!("Server running at: {}", url);

                let (lock, cvar) = &*shared;
                let became_running = {
                    let mut state = lock_or_recover(lock);
                    state.url = Some(url.to_string());
                    if state.status == ServerStatus::Launching {
                        state.status = ServerStatus::Running;
                        true
                    } else {
                        false
                    }
                };
                cvar.notify_all();
                if became_running {
                    invoke_listener(&listener, ServerStatus::Running);
                }
            }
        }
    }

    // Output stream closed: the child exited or the pipe was torn down.
    let (lock, cvar) = &*shared;
    let settled = {
        let mut state = lock_or_recover(lock);
        let next = match state.status {
            ServerStatus::Launching => Some(ServerStatus::Error),
            ServerStatus::Error | ServerStatus::AlreadyRunning => None,
            _ => Some(ServerStatus::Stopped),
        };
        if let Some(status) = next {
            if let Some(exit) = state.reap_child() {
                debug!("Server process exited ({})", exit);
            }
            state.status = status;
        }
        next
    };
    cvar.notify_all();

    match settled {
        Some(ServerStatus::Error) => {
            error!("Server exited before reporting a URL");
            invoke_listener(&listener, ServerStatus::Error);
        }
        Some(status) => {
            info!("Server output stream closed");
            invoke_listener(&listener, status);
        }
        None => {}
    }
}

/// Invokes the registered listener, swallowing (and logging) panics so
/// observer failures never take the supervisor down.
fn invoke_listener(listener: &Mutex<Option<StatusListener>>, status: ServerStatus) {
    let callback = lock_or_recover(listener).clone();
    if let Some(callback) = callback {
        let result = panic::catch_unwind(AssertUnwindSafe(|| callback(status)));
        if result.is_err() {
            error!("Status listener panicked (status: {})", status);
        }
    }
}

/// Locks a mutex, recovering from poisoning: a panicked observer or
/// reader must not wedge the supervisor for the rest of the session.
fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
