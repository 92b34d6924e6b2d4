use std::process::Stdio;
use std::time::Duration;

use log::{debug, error, trace, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{oneshot, watch};

use crate::error::ProcessError;

/// Exit of a supervised child process, as observed by its monitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// The child exited on its own.
    Exited { code: Option<i32> },
    /// The child went down in response to [`BackendProcessHandle::terminate`].
    Terminated,
}

/// Run a short-lived command to completion, capturing its output.
///
/// Success requires exit code zero; anything else maps to a typed
/// [`ProcessError`]. The child is killed if the timeout elapses first.
///
/// # Errors
/// Returns [`ProcessError::Spawn`] when the program cannot be started,
/// [`ProcessError::Timeout`] when it outlives `timeout`, and
/// [`ProcessError::CommandFailed`] with captured stderr on a non-zero exit.
pub async fn run_checked(
    mut cmd: Command,
    program: &'static str,
    timeout: Duration,
) -> Result<String, ProcessError> {
    cmd.stdin(Stdio::null());
    cmd.kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| ProcessError::Timeout { program, timeout })?
        .map_err(|source| ProcessError::Spawn { program, source })?;

    debug!("{program} exit status: {:?}", output.status);
    trace!("{program} stdout: {}", String::from_utf8_lossy(&output.stdout));

    if !output.stderr.is_empty() {
        trace!("{program} stderr: {}", String::from_utf8_lossy(&output.stderr));
    }

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!("{program} failed: code={:?} stderr='{stderr}'", output.status.code());
        Err(ProcessError::CommandFailed {
            program,
            code: output.status.code(),
            stderr,
        })
    }
}

/// Owns a long-running child process: the backend web server.
///
/// Stdout and stderr are forwarded line-by-line to the log, and the exit is
/// published as a single discrete event on a watch channel, so callers await
/// it instead of registering callbacks.
pub struct BackendProcessHandle {
    program: &'static str,
    pid: Option<u32>,
    shutdown: Option<oneshot::Sender<()>>,
    exit: watch::Receiver<Option<ProcessExit>>,
}

impl BackendProcessHandle {
    /// Spawn `cmd` and start supervising it.
    ///
    /// # Errors
    /// Returns [`ProcessError::Spawn`] when the program cannot be started.
    pub fn spawn(mut cmd: Command, program: &'static str) -> Result<Self, ProcessError> {
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|source| ProcessError::Spawn { program, source })?;
        let pid = child.id();
        debug!("{program} spawned with pid {pid:?}");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("{program}: {line}");
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("{program}: {line}");
                }
            });
        }

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let observed = tokio::select! {
                status = child.wait() => {
                    ProcessExit::Exited { code: status.ok().and_then(|s| s.code()) }
                }
                requested = &mut shutdown_rx => {
                    if requested.is_ok() {
                        if let Err(error) = child.start_kill() {
                            warn!("failed to signal {program} for shutdown: {error}");
                        }
                        let _ = child.wait().await;
                        ProcessExit::Terminated
                    } else {
                        // Handle dropped without a terminate request; keep
                        // waiting so the exit is still observed and logged.
                        let status = child.wait().await;
                        ProcessExit::Exited { code: status.ok().and_then(|s| s.code()) }
                    }
                }
            };
            debug!("{program} exit observed: {observed:?}");
            let _ = exit_tx.send(Some(observed));
        });

        Ok(Self {
            program,
            pid,
            shutdown: Some(shutdown_tx),
            exit: exit_rx,
        })
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The exit observed so far, if any.
    #[must_use]
    pub fn exit_status(&self) -> Option<ProcessExit> {
        *self.exit.borrow()
    }

    /// A receiver that resolves once, when the child exits.
    #[must_use]
    pub fn exit_watch(&self) -> watch::Receiver<Option<ProcessExit>> {
        self.exit.clone()
    }

    /// Await the child's exit, however it comes about.
    pub async fn wait(&mut self) -> ProcessExit {
        loop {
            if let Some(observed) = *self.exit.borrow() {
                return observed;
            }
            if self.exit.changed().await.is_err() {
                // Monitor task gone without publishing; treat as an opaque exit.
                return ProcessExit::Exited { code: None };
            }
        }
    }

    /// Request termination and wait for the child to go down.
    pub async fn terminate(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            debug!("terminating {}", self.program);
            let _ = shutdown.send(());
        }
        self.wait().await;
    }
}
