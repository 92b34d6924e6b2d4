//! Backup and restore of the primary database through its external dump and
//! restore utilities.
//!
//! Both operations are gated on the connectivity mode: the fallback engine is
//! a plain local file with no dump tooling, so backup and restore decline
//! (without error) whenever the mode is not `Primary`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{info, warn};
use thiserror::Error;
use tillhost_backend::{ConnectionState, DbCredentials, ProcessError};
use tillhost_platform::HideWindow;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("failed to open {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct BackupRestoreOrchestrator {
    credentials: DbCredentials,
    connection: watch::Receiver<ConnectionState>,
    dump_tool: PathBuf,
    restore_tool: PathBuf,
}

impl BackupRestoreOrchestrator {
    #[must_use]
    pub fn new(credentials: DbCredentials, connection: watch::Receiver<ConnectionState>) -> Self {
        let dump_tool = which::which("mysqldump").unwrap_or_else(|_| PathBuf::from("mysqldump"));
        let restore_tool = which::which("mysql").unwrap_or_else(|_| PathBuf::from("mysql"));
        Self {
            credentials,
            connection,
            dump_tool,
            restore_tool,
        }
    }

    /// Override the dump executable, for nonstandard installs.
    #[must_use]
    pub fn with_dump_tool(mut self, dump_tool: PathBuf) -> Self {
        self.dump_tool = dump_tool;
        self
    }

    /// Override the restore executable, for nonstandard installs.
    #[must_use]
    pub fn with_restore_tool(mut self, restore_tool: PathBuf) -> Self {
        self.restore_tool = restore_tool;
        self
    }

    /// Date-stamped filename suggestion for the UI save dialog.
    #[must_use]
    pub fn default_backup_filename() -> String {
        format!(
            "tillhost-backup-{}.sql",
            chrono::Local::now().format("%Y-%m-%d")
        )
    }

    /// Dump the primary database to `destination`.
    ///
    /// Returns `Ok(false)` without spawning anything when the connectivity
    /// mode is not `Primary`. On failure, data already written to
    /// `destination` is left in place.
    ///
    /// # Errors
    /// Returns a [`BackupError`] when the destination cannot be created or
    /// the dump tool fails.
    pub async fn backup(&self, destination: &Path) -> Result<bool, BackupError> {
        if !self.primary_mode() {
            info!("Backup declined: connectivity mode is not Primary");
            return Ok(false);
        }

        let file = std::fs::File::create(destination).map_err(|source| BackupError::File {
            path: destination.to_path_buf(),
            source,
        })?;

        let mut cmd = Command::new(&self.dump_tool);
        self.credential_args(&mut cmd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::from(file));
        cmd.hide_window();

        info!("Dumping database to {}", destination.display());
        run_to_completion(cmd, "mysqldump").await?;
        info!("Database backup written to {}", destination.display());
        Ok(true)
    }

    /// Feed `source` into the restore tool, overwriting the live database.
    ///
    /// Obtaining user confirmation is the caller's responsibility; no
    /// pre-restore backup is taken here.
    ///
    /// # Errors
    /// Returns a [`BackupError`] when the source cannot be opened or the
    /// restore tool fails.
    pub async fn restore(&self, source: &Path) -> Result<bool, BackupError> {
        if !self.primary_mode() {
            info!("Restore declined: connectivity mode is not Primary");
            return Ok(false);
        }

        let file = std::fs::File::open(source).map_err(|source_err| BackupError::File {
            path: source.to_path_buf(),
            source: source_err,
        })?;

        let mut cmd = Command::new(&self.restore_tool);
        self.credential_args(&mut cmd);
        cmd.stdin(Stdio::from(file));
        cmd.stdout(Stdio::null());
        cmd.hide_window();

        info!("Restoring database from {}", source.display());
        run_to_completion(cmd, "mysql restore").await?;
        info!("Database restore completed");
        Ok(true)
    }

    fn primary_mode(&self) -> bool {
        *self.connection.borrow() == ConnectionState::Primary
    }

    fn credential_args(&self, cmd: &mut Command) {
        cmd.arg("--host")
            .arg(&self.credentials.host)
            .arg("--port")
            .arg(self.credentials.port.to_string())
            .arg("--user")
            .arg(&self.credentials.user)
            .arg(format!("--password={}", self.credentials.password))
            .arg(&self.credentials.database);
    }
}

/// Wait for a dump/restore child, forwarding its stderr to the log as
/// diagnostic text (never parsed for results).
async fn run_to_completion(mut cmd: Command, program: &'static str) -> Result<(), ProcessError> {
    cmd.kill_on_drop(true);
    cmd.stderr(Stdio::piped());

    let mut child = cmd
        .spawn()
        .map_err(|source| ProcessError::Spawn { program, source })?;

    let stderr_task = child.stderr.take().map(|stderr| {
        tokio::spawn(async move {
            let mut collected = String::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("{program}: {line}");
                collected.push_str(&line);
                collected.push('\n');
            }
            collected
        })
    });

    let status = child
        .wait()
        .await
        .map_err(|source| ProcessError::Spawn { program, source })?;

    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    if status.success() {
        Ok(())
    } else {
        Err(ProcessError::CommandFailed {
            program,
            code: status.code(),
            stderr: stderr.trim().to_string(),
        })
    }
}
