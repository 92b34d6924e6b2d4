use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited unsuccessfully: {stderr}")]
    CommandFailed {
        program: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} did not finish within {timeout:?}")]
    Timeout {
        program: &'static str,
        timeout: Duration,
    },
}

/// Failures that end a boot attempt. None of these are retried; the shell
/// reports them and stays out of the ready state.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("backend configuration rewrite failed: {0}")]
    Config(#[from] ConfigError),

    #[error("schema migration failed: {0}")]
    Migration(#[source] ProcessError),

    #[error("failed to launch backend server: {0}")]
    Launch(#[source] ProcessError),

    #[error("backend server exited during startup (exit code {code:?})")]
    DiedDuringStartup { code: Option<i32> },
}
