//! Subprocess management
//!
//! Launches the child test command, exposes its stdout as a line stream and
//! keeps a killable handle. The child is shared between that handle, which
//! signals it synchronously, and a reaper task that resolves its exit code.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::RunError;

/// Exit code for a run with no recorded failures
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when any failure was recorded
pub const EXIT_FAILURE: i32 = 1;
/// Conventional exit code for a user interrupt (128 + SIGINT)
pub const EXIT_INTERRUPTED: i32 = 130;

/// The command line used to launch the child test process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Discard child stderr (the interactive view owns the terminal)
    pub quiet_stderr: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            quiet_stderr: false,
        }
    }

    /// Build `<runner> test -json -v [...]` for a set of packages
    pub fn go_test(
        runner: &str,
        packages: &[String],
        run_filter: Option<&str>,
        cover_profile: Option<&PathBuf>,
        extra_args: &[String],
    ) -> Self {
        let mut args = vec!["test".to_string(), "-json".to_string(), "-v".to_string()];

        if let Some(pattern) = run_filter {
            args.push("-run".to_string());
            args.push(pattern.to_string());
        }

        if let Some(profile) = cover_profile {
            args.push(format!("-coverprofile={}", profile.display()));
            args.push("-coverpkg=./...".to_string());
        }

        args.extend(extra_args.iter().cloned());
        args.extend(packages.iter().cloned());

        Self::new(runner, args)
    }

    pub fn quiet_stderr(mut self, quiet: bool) -> Self {
        self.quiet_stderr = quiet;
        self
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

type LineSource = Box<dyn AsyncRead + Send + Unpin>;

/// Line stream over the child's stdout. Exactly one owner reads at a time.
///
/// Lines are raw bytes: the child may print anything, and a line that is
/// not UTF-8 must not end the stream.
pub struct LineReader {
    source: BufReader<LineSource>,
}

impl LineReader {
    pub fn new<R>(source: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let source: LineSource = Box::new(source);
        Self {
            source: BufReader::new(source),
        }
    }

    /// Next raw line without its `\n`, or `None` at end of stream
    pub async fn next_line(&mut self) -> Result<Option<Vec<u8>>, RunError> {
        let mut line = Vec::new();
        let read = self
            .source
            .read_until(b'\n', &mut line)
            .await
            .map_err(RunError::Read)?;

        if read == 0 {
            return Ok(None);
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        Ok(Some(line))
    }
}

impl fmt::Debug for LineReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineReader").finish_non_exhaustive()
    }
}

/// Resolves to the child's exit code
#[derive(Debug)]
pub struct ExitWaiter {
    rx: oneshot::Receiver<i32>,
}

impl ExitWaiter {
    pub async fn wait(self) -> i32 {
        // A dropped reaper means the child was torn down with the runtime
        self.rx.await.unwrap_or(EXIT_FAILURE)
    }
}

/// How often the reaper checks whether the child has exited
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

type SharedChild = Arc<Mutex<Child>>;

fn lock_child(child: &SharedChild) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|e| e.into_inner())
}

/// Handle to a running child test process
#[derive(Debug)]
pub struct Subprocess {
    command: String,
    pid: Option<u32>,
    child: SharedChild,
    killed: Arc<AtomicBool>,
    exit_rx: Option<oneshot::Receiver<i32>>,
}

impl Subprocess {
    /// Spawn the child and its reaper task. Must run inside a tokio runtime.
    pub fn spawn(spec: &CommandSpec) -> Result<(Self, LineReader), RunError> {
        let command = spec.to_string();
        info!(%command, "starting test process");

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(if spec.quiet_stderr {
                Stdio::null()
            } else {
                Stdio::inherit()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| RunError::Launch {
            command: command.clone(),
            source,
        })?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.start_kill();
                return Err(RunError::PipeUnavailable(command));
            }
        };

        let pid = child.id();
        let child = Arc::new(Mutex::new(child));
        let killed = Arc::new(AtomicBool::new(false));
        let (exit_tx, exit_rx) = oneshot::channel::<i32>();

        let reaped = Arc::clone(&child);
        let reaper_killed = Arc::clone(&killed);
        tokio::spawn(async move {
            let mut poll = tokio::time::interval(EXIT_POLL_INTERVAL);
            let code = loop {
                poll.tick().await;
                let status = lock_child(&reaped).try_wait();
                match status {
                    Ok(Some(_)) if reaper_killed.load(Ordering::SeqCst) => break EXIT_INTERRUPTED,
                    Ok(Some(status)) => break status.code().unwrap_or(EXIT_FAILURE),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(error = %e, "failed to wait for test process");
                        break EXIT_FAILURE;
                    }
                }
            };

            debug!(code, "test process finished");
            let _ = exit_tx.send(code);
        });

        Ok((
            Self {
                command,
                pid,
                child,
                killed,
                exit_rx: Some(exit_rx),
            },
            LineReader::new(stdout),
        ))
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Signal the child right away. Idempotent; returns true for the first request.
    pub fn kill(&self) -> bool {
        if self.killed.swap(true, Ordering::SeqCst) {
            return false;
        }

        info!(pid = ?self.pid, "killing test process");
        if let Err(e) = lock_child(&self.child).start_kill() {
            debug!(error = %e, "test process already exited");
        }
        true
    }

    pub fn kill_requested(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// Take the exit waiter; available once
    pub fn take_exit(&mut self) -> Option<ExitWaiter> {
        self.exit_rx.take().map(|rx| ExitWaiter { rx })
    }
}
