use thiserror::Error;

/// Top-level failure reported back for each user command. Each operation
/// fails independently; none of these take the shell down.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("backend boot failed: {0}")]
    Boot(#[from] tillhost_backend::SupervisorError),

    #[error("backup operation failed: {0}")]
    Backup(#[from] tillhost_backup::BackupError),

    #[error("update check failed: {0}")]
    UpdateCheck(#[from] tillhost_core::UpdateError),

    #[error("update install failed: {0}")]
    UpdateInstall(#[from] tillhost_core::InstallError),
}

#[cfg(test)]
mod tests {
    use super::ShellError;
    use tillhost_backend::{ConfigError, SupervisorError};

    #[test]
    fn boot_errors_wrap_supervisor_failures() {
        let error = ShellError::from(SupervisorError::Config(ConfigError::DatabaseBlockMissing));

        assert!(
            error
                .to_string()
                .starts_with("backend boot failed: backend configuration rewrite failed")
        );
    }
}
