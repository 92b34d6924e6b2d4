use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use tillhost_platform::HideWindow;
use tokio::process::Command;

use crate::process::run_checked;

/// Connection parameters for the primary database engine.
///
/// Always injected from the shell settings; nothing in this crate carries
/// credential literals.
#[derive(Debug, Clone)]
pub struct DbCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Connected,
    Unreachable,
}

/// Reachability check for the primary engine. Implemented by the external
/// `mysql` client in production and by scripted probes in supervisor tests.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn probe_primary(&self) -> ProbeOutcome;
}

pub struct MysqlProbe {
    client: PathBuf,
    credentials: DbCredentials,
    timeout: Duration,
}

impl MysqlProbe {
    #[must_use]
    pub fn new(credentials: DbCredentials, timeout: Duration) -> Self {
        let client = which::which("mysql").unwrap_or_else(|_| PathBuf::from("mysql"));
        Self {
            client,
            credentials,
            timeout,
        }
    }

    /// Override the client executable, for nonstandard installs.
    #[must_use]
    pub fn with_client(mut self, client: PathBuf) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl ConnectivityProbe for MysqlProbe {
    async fn probe_primary(&self) -> ProbeOutcome {
        let mut cmd = Command::new(&self.client);
        cmd.arg("--host")
            .arg(&self.credentials.host)
            .arg("--port")
            .arg(self.credentials.port.to_string())
            .arg("--user")
            .arg(&self.credentials.user)
            .arg(format!("--password={}", self.credentials.password))
            .arg("--execute")
            .arg("SELECT 1");
        cmd.hide_window();

        // The probe holds no connection; exit code zero of the one-shot
        // client invocation is the entire signal.
        match run_checked(cmd, "mysql probe", self.timeout).await {
            Ok(_) => {
                info!("Primary database engine is reachable");
                ProbeOutcome::Connected
            }
            Err(error) => {
                debug!("Primary database probe failed: {error}");
                ProbeOutcome::Unreachable
            }
        }
    }
}
