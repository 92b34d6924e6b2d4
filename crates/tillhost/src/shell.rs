use std::path::Path;
use std::time::Duration;

use log::info;
use tillhost_backend::{
    BackendSupervisor, ConnectionState, MysqlProbe, SupervisorEvent, SupervisorState,
};
use tillhost_backup::BackupRestoreOrchestrator;
use tillhost_core::{
    DownloadProgress, InstallHandoff, ReleaseAsset, UpdateDecision, UpdateError,
};
use tokio::sync::mpsc;

use crate::error::ShellError;
use crate::settings::AppSettings;

const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The composition root: owns the supervisor, the backup orchestrator, and
/// the HTTP client the updater runs on. Constructed once at startup, torn
/// down on shutdown; nothing here is a global.
///
/// Each public method maps 1:1 to a user command from the UI layer.
/// Serializing duplicate invocations of the same operation is the caller's
/// responsibility.
pub struct Shell {
    supervisor: BackendSupervisor,
    backup: BackupRestoreOrchestrator,
    http: reqwest::Client,
    update_check_delay: Duration,
}

impl Shell {
    /// Wire up the shell from settings. The supervisor is constructed before
    /// anything update-related, matching the boot order.
    ///
    /// # Errors
    /// Returns an error when the HTTP client cannot be built.
    pub fn new(
        settings: &AppSettings,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SupervisorEvent>), ShellError> {
        let credentials = settings.db_credentials();

        let probe = MysqlProbe::new(
            credentials.clone(),
            Duration::from_secs(settings.probe_timeout_secs),
        );
        let (supervisor, events) =
            BackendSupervisor::new(settings.launch_config(), Box::new(probe));

        let mut backup = BackupRestoreOrchestrator::new(credentials, supervisor.connection_watch());
        if let Some(dump_tool) = &settings.dump_tool {
            backup = backup.with_dump_tool(dump_tool.clone());
        }
        if let Some(restore_tool) = &settings.restore_tool {
            backup = backup.with_restore_tool(restore_tool.clone());
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.http_timeout_secs))
            .build()
            .map_err(UpdateError::Request)?;

        Ok((
            Self {
                supervisor,
                backup,
                http,
                update_check_delay: Duration::from_secs(settings.update_check_delay_secs),
            },
            events,
        ))
    }

    /// Bring the backend online; fatal for the session when it fails.
    ///
    /// # Errors
    /// Propagates the supervisor's boot failure.
    pub async fn boot(&mut self) -> Result<(), ShellError> {
        self.supervisor.start().await?;
        info!(
            "Shell ready, connectivity mode {:?}",
            self.connection_state()
        );
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        self.supervisor.stop().await;
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.connection_state()
    }

    #[must_use]
    pub fn supervisor_state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    #[must_use]
    pub fn update_check_delay(&self) -> Duration {
        self.update_check_delay
    }

    /// User command: back up the database to `destination`. `Ok(false)` means
    /// the operation was declined (not in Primary mode), not that it failed.
    ///
    /// # Errors
    /// Returns an error when the dump tool fails or the file is unusable.
    pub async fn backup_to(&self, destination: &Path) -> Result<bool, ShellError> {
        Ok(self.backup.backup(destination).await?)
    }

    /// User command: restore the database from `source`. The UI layer must
    /// have confirmed with the user first; a successful restore overwrites
    /// the live database.
    ///
    /// # Errors
    /// Returns an error when the restore tool fails or the file is unusable.
    pub async fn restore_from(&self, source: &Path) -> Result<bool, ShellError> {
        Ok(self.backup.restore(source).await?)
    }

    /// User command (and timed startup task): check the release feed.
    ///
    /// # Errors
    /// Returns an error when the feed is unreachable or unparseable.
    pub async fn check_for_updates(&self) -> Result<UpdateDecision, ShellError> {
        Ok(tillhost_core::check_for_updates(&self.http, CURRENT_VERSION).await?)
    }

    /// User command: the user accepted the offered update. On success the
    /// caller must exit the process so the installer can run.
    ///
    /// # Errors
    /// Returns an error when the download, verification, or installer launch
    /// fails.
    pub async fn download_and_install(
        &self,
        asset: &ReleaseAsset,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> Result<InstallHandoff, ShellError> {
        Ok(tillhost_core::download_and_install(&self.http, asset, progress).await?)
    }
}
