use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use fs2::FileExt;
use thiserror::Error;
use tillhost_platform::AppPaths;

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("another tillhost instance is already running")]
    AlreadyRunning,
    #[error("failed to resolve application paths: {0}")]
    Paths(#[from] tillhost_platform::AppPathsError),
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl AcquireError {
    fn io(context: &'static str, source: std::io::Error) -> Self {
        Self::Io { context, source }
    }
}

/// Advisory file lock held for the shell's lifetime. Two shells sharing the
/// backend port and database would fight each other, so the second exits.
pub struct SingleInstance {
    _file: File,
}

impl SingleInstance {
    /// Acquire the instance lock.
    ///
    /// # Errors
    /// Returns [`AcquireError::AlreadyRunning`] when another shell holds the
    /// lock, or an I/O error when the lock file is unusable.
    pub fn acquire() -> Result<Self, AcquireError> {
        let paths = AppPaths::new()?;
        paths
            .ensure_dirs()
            .map_err(|error| AcquireError::io("failed to create app directories", error))?;

        let mut lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(paths.instance_lock_file())
            .map_err(|error| AcquireError::io("failed to open instance lock file", error))?;

        match lock_file.try_lock_exclusive() {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(AcquireError::AlreadyRunning);
            }
            Err(error) => {
                return Err(AcquireError::io("failed to acquire instance lock", error));
            }
        }

        lock_file
            .set_len(0)
            .and_then(|()| lock_file.seek(SeekFrom::Start(0)).map(|_| ()))
            .and_then(|()| writeln!(lock_file, "{}", std::process::id()))
            .map_err(|error| AcquireError::io("failed to write instance lock metadata", error))?;

        Ok(Self { _file: lock_file })
    }
}

#[cfg(test)]
mod tests {
    use super::SingleInstance;

    #[test]
    fn acquire_returns_a_guard() {
        assert!(SingleInstance::acquire().is_ok());
    }
}
