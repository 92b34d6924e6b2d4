use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info, warn};
use tillhost_platform::HideWindow;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use crate::config;
use crate::error::{ProcessError, SupervisorError};
use crate::probe::{ConnectivityProbe, ProbeOutcome};
use crate::process::{BackendProcessHandle, ProcessExit, run_checked};

/// The database engine currently selected for the backend. Written only by
/// the supervisor, after a probe; everyone else reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Unknown,
    Primary,
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Probing,
    PrimaryReady,
    SwitchingToFallback,
    MigratingSchema,
    Launching,
    Running,
    Stopped,
    Crashed,
}

/// Status events for the UI layer. Delivery is best-effort; a closed receiver
/// never blocks the supervisor.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    StateChanged(SupervisorState),
    ConnectionSelected(ConnectionState),
    BackendReady { port: u16 },
    BackendCrashed { code: Option<i32> },
}

/// How to bring the backend up. All of it comes from the shell settings.
#[derive(Debug, Clone)]
pub struct BackendLaunchConfig {
    /// Working directory of the backend; also where its config document lives.
    pub backend_root: PathBuf,
    /// Interpreter the backend runs under.
    pub interpreter: PathBuf,
    /// Entry script, resolved relative to `backend_root`.
    pub entry_script: PathBuf,
    /// Local port the backend binds.
    pub port: u16,
    /// The backend configuration document the failover rewrite targets.
    pub config_file: PathBuf,
    /// How long to wait after launch before declaring the backend ready.
    /// There is no active readiness poll; the UI may race a slow bind.
    pub startup_grace: Duration,
    pub migration_timeout: Duration,
}

pub struct BackendSupervisor {
    launch: BackendLaunchConfig,
    probe: Box<dyn ConnectivityProbe>,
    state_tx: watch::Sender<SupervisorState>,
    connection_tx: watch::Sender<ConnectionState>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    handle: Option<BackendProcessHandle>,
}

impl BackendSupervisor {
    #[must_use]
    pub fn new(
        launch: BackendLaunchConfig,
        probe: Box<dyn ConnectivityProbe>,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(SupervisorState::Idle);
        let (connection_tx, _) = watch::channel(ConnectionState::Unknown);

        (
            Self {
                launch,
                probe,
                state_tx,
                connection_tx,
                events,
                handle: None,
            },
            events_rx,
        )
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        *self.state_tx.borrow()
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_tx.borrow()
    }

    /// Read-only view of the connectivity mode, for the components gated on
    /// it (backup/restore).
    #[must_use]
    pub fn connection_watch(&self) -> watch::Receiver<ConnectionState> {
        self.connection_tx.subscribe()
    }

    #[must_use]
    pub fn state_watch(&self) -> watch::Receiver<SupervisorState> {
        self.state_tx.subscribe()
    }

    /// Bring the backend to the ready state.
    ///
    /// Probes the primary engine, falls back to the local engine (rewriting
    /// the backend config and migrating the schema) when it is unreachable,
    /// launches the server process, and waits out the startup grace period.
    ///
    /// # Errors
    /// Any [`SupervisorError`] is terminal for this boot attempt; nothing is
    /// retried.
    pub async fn start(&mut self) -> Result<(), SupervisorError> {
        if self.handle.is_some() {
            warn!("start() called while the backend is already supervised");
            return Ok(());
        }

        self.set_state(SupervisorState::Probing);
        match self.probe.probe_primary().await {
            ProbeOutcome::Connected => {
                self.set_state(SupervisorState::PrimaryReady);
                self.select_connection(ConnectionState::Primary);
            }
            ProbeOutcome::Unreachable => {
                // Not an error: this is the failover path.
                self.set_state(SupervisorState::SwitchingToFallback);
                config::select_fallback_engine(&self.launch.config_file)?;
                self.select_connection(ConnectionState::Fallback);

                self.set_state(SupervisorState::MigratingSchema);
                self.run_schema_migration().await?;
            }
        }

        self.set_state(SupervisorState::Launching);
        let handle = self.spawn_backend().map_err(SupervisorError::Launch)?;

        tokio::time::sleep(self.launch.startup_grace).await;

        if let Some(ProcessExit::Exited { code }) = handle.exit_status() {
            self.set_state(SupervisorState::Crashed);
            let _ = self.events.send(SupervisorEvent::BackendCrashed { code });
            return Err(SupervisorError::DiedDuringStartup { code });
        }

        self.spawn_exit_monitor(handle.exit_watch());
        self.handle = Some(handle);
        self.set_state(SupervisorState::Running);
        let _ = self.events.send(SupervisorEvent::BackendReady {
            port: self.launch.port,
        });
        Ok(())
    }

    /// Terminate the backend server and wait for it to go down.
    pub async fn stop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            info!("Stopping backend server (pid {:?})", handle.pid());
            handle.terminate().await;
            // An explicit shutdown of a live child lands in Stopped; a child
            // that had already crashed keeps the Crashed state.
            if handle.exit_status() == Some(ProcessExit::Terminated) {
                transition(&self.state_tx, &self.events, SupervisorState::Stopped);
            }
        }
    }

    async fn run_schema_migration(&self) -> Result<(), SupervisorError> {
        let mut cmd = Command::new(&self.launch.interpreter);
        cmd.arg(&self.launch.entry_script)
            .arg("migrate")
            .current_dir(&self.launch.backend_root);
        cmd.hide_window();

        info!("Running schema migration for the fallback engine");
        let output = run_checked(cmd, "schema migration", self.launch.migration_timeout)
            .await
            .map_err(SupervisorError::Migration)?;
        debug!("Schema migration finished ({} bytes of output)", output.len());
        Ok(())
    }

    fn spawn_backend(&self) -> Result<BackendProcessHandle, ProcessError> {
        let mut cmd = Command::new(&self.launch.interpreter);
        cmd.arg(&self.launch.entry_script)
            .arg("runserver")
            .arg(self.launch.port.to_string())
            .current_dir(&self.launch.backend_root);
        cmd.hide_window();

        info!(
            "Launching backend: {} {} runserver {}",
            self.launch.interpreter.display(),
            self.launch.entry_script.display(),
            self.launch.port
        );
        BackendProcessHandle::spawn(cmd, "backend server")
    }

    fn spawn_exit_monitor(&self, mut exit: watch::Receiver<Option<ProcessExit>>) {
        let state_tx = self.state_tx.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let observed = loop {
                if let Some(observed) = *exit.borrow() {
                    break observed;
                }
                if exit.changed().await.is_err() {
                    return;
                }
            };

            match observed {
                ProcessExit::Terminated => {
                    transition(&state_tx, &events, SupervisorState::Stopped);
                }
                ProcessExit::Exited { code } => {
                    warn!("Backend server exited on its own with code {code:?}");
                    transition(&state_tx, &events, SupervisorState::Crashed);
                    let _ = events.send(SupervisorEvent::BackendCrashed { code });
                }
            }
        });
    }

    fn set_state(&self, next: SupervisorState) {
        transition(&self.state_tx, &self.events, next);
    }

    fn select_connection(&self, mode: ConnectionState) {
        info!("Connectivity mode selected: {mode:?}");
        let _ = self.connection_tx.send(mode);
        let _ = self.events.send(SupervisorEvent::ConnectionSelected(mode));
    }
}

fn transition(
    state_tx: &watch::Sender<SupervisorState>,
    events: &mpsc::UnboundedSender<SupervisorEvent>,
    next: SupervisorState,
) {
    let changed = state_tx.send_if_modified(|current| {
        if *current == next {
            false
        } else {
            *current = next;
            true
        }
    });
    if changed {
        debug!("Supervisor state -> {next:?}");
        let _ = events.send(SupervisorEvent::StateChanged(next));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::{
        BackendLaunchConfig, BackendSupervisor, ConnectionState, SupervisorState,
    };
    use crate::config::FALLBACK_ENGINE;
    use crate::error::SupervisorError;
    use crate::probe::{ConnectivityProbe, ProbeOutcome};

    struct ScriptedProbe(ProbeOutcome);

    #[async_trait]
    impl ConnectivityProbe for ScriptedProbe {
        async fn probe_primary(&self) -> ProbeOutcome {
            self.0
        }
    }

    /// A stand-in backend: records every subcommand it is invoked with, exits
    /// zero for `migrate`, and stays up for `runserver`.
    fn write_fake_backend(dir: &Path, migrate_exit: i32, runserver_behavior: &str) -> PathBuf {
        let calls = dir.join("calls.log");
        let script = dir.join("backend.sh");
        std::fs::write(
            &script,
            format!(
                "printf '%s\\n' \"$1\" >> {calls}\n\
                 case \"$1\" in\n\
                   migrate) exit {migrate_exit} ;;\n\
                   runserver) {runserver_behavior} ;;\n\
                 esac\n",
                calls = calls.display(),
            ),
        )
        .expect("write fake backend script");
        script
    }

    fn recorded_calls(dir: &Path) -> Vec<String> {
        std::fs::read_to_string(dir.join("calls.log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    fn write_backend_config(dir: &Path, with_database_block: bool) -> PathBuf {
        let mut document = json!({ "base_dir": dir.to_string_lossy() });
        if with_database_block {
            document["database"] = json!({
                "engine": "mysql",
                "host": "127.0.0.1",
                "port": 3306,
                "name": "till_db"
            });
        }
        let path = dir.join("config.json");
        std::fs::write(&path, document.to_string()).expect("write backend config");
        path
    }

    fn launch_config(dir: &Path, script: PathBuf, config_file: PathBuf) -> BackendLaunchConfig {
        BackendLaunchConfig {
            backend_root: dir.to_path_buf(),
            interpreter: PathBuf::from("sh"),
            entry_script: script,
            port: 8641,
            config_file,
            startup_grace: Duration::from_millis(100),
            migration_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn probe_success_launches_without_rewrite_or_migration() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_fake_backend(dir.path(), 0, "sleep 30");
        // A config without a database block would make any rewrite attempt
        // fail loudly, proving the primary path never touches it.
        let config_file = write_backend_config(dir.path(), false);
        let (mut supervisor, _events) = BackendSupervisor::new(
            launch_config(dir.path(), script, config_file),
            Box::new(ScriptedProbe(ProbeOutcome::Connected)),
        );

        supervisor.start().await.expect("boot should succeed");

        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(supervisor.connection_state(), ConnectionState::Primary);
        assert_eq!(recorded_calls(dir.path()), vec!["runserver"]);

        supervisor.stop().await;
        assert_eq!(supervisor.state(), SupervisorState::Stopped);
    }

    #[tokio::test]
    async fn probe_failure_rewrites_migrates_then_launches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_fake_backend(dir.path(), 0, "sleep 30");
        let config_file = write_backend_config(dir.path(), true);
        let (mut supervisor, _events) = BackendSupervisor::new(
            launch_config(dir.path(), script, config_file.clone()),
            Box::new(ScriptedProbe(ProbeOutcome::Unreachable)),
        );

        supervisor.start().await.expect("fallback boot should succeed");

        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert_eq!(supervisor.connection_state(), ConnectionState::Fallback);
        assert_eq!(recorded_calls(dir.path()), vec!["migrate", "runserver"]);

        let rewritten: Value = serde_json::from_str(
            &std::fs::read_to_string(&config_file).expect("read rewritten config"),
        )
        .expect("rewritten config is JSON");
        assert_eq!(rewritten["database"]["engine"], FALLBACK_ENGINE);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn failing_migration_never_reaches_running() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_fake_backend(dir.path(), 3, "sleep 30");
        let config_file = write_backend_config(dir.path(), true);
        let (mut supervisor, _events) = BackendSupervisor::new(
            launch_config(dir.path(), script, config_file),
            Box::new(ScriptedProbe(ProbeOutcome::Unreachable)),
        );

        let result = supervisor.start().await;

        assert!(matches!(result, Err(SupervisorError::Migration(_))));
        assert_eq!(supervisor.state(), SupervisorState::MigratingSchema);
        assert_eq!(recorded_calls(dir.path()), vec!["migrate"]);
    }

    #[tokio::test]
    async fn missing_database_block_is_fatal_on_the_fallback_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_fake_backend(dir.path(), 0, "sleep 30");
        let config_file = write_backend_config(dir.path(), false);
        let (mut supervisor, _events) = BackendSupervisor::new(
            launch_config(dir.path(), script, config_file),
            Box::new(ScriptedProbe(ProbeOutcome::Unreachable)),
        );

        let result = supervisor.start().await;

        assert!(matches!(result, Err(SupervisorError::Config(_))));
        assert!(recorded_calls(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn backend_dying_during_grace_period_is_a_crash() {
        let dir = tempfile::tempdir().expect("tempdir");
        let script = write_fake_backend(dir.path(), 0, "exit 7");
        let config_file = write_backend_config(dir.path(), false);
        let (mut supervisor, _events) = BackendSupervisor::new(
            launch_config(dir.path(), script, config_file),
            Box::new(ScriptedProbe(ProbeOutcome::Connected)),
        );

        let result = supervisor.start().await;

        assert!(matches!(
            result,
            Err(SupervisorError::DiedDuringStartup { code: Some(7) })
        ));
        assert_eq!(supervisor.state(), SupervisorState::Crashed);
    }
}
