//! Tillhost: desktop shell for the till point-of-sale web backend.
//!
//! Boots the backend (with automatic database failover), then stays resident
//! forwarding supervisor events until shutdown. The update check runs once,
//! a few seconds after the shell becomes ready, and again on user request
//! through [`shell::Shell::check_for_updates`].

mod error;
mod logging;
mod settings;
mod shell;
mod single_instance;

use std::process::ExitCode;

use log::{debug, error, info, warn};
use tillhost_backend::SupervisorEvent;

use crate::settings::AppSettings;
use crate::shell::Shell;

#[tokio::main]
async fn main() -> ExitCode {
    let settings = AppSettings::load();
    logging::init_logging(settings.debug_logging, settings.max_log_size_bytes);

    let _instance = match single_instance::SingleInstance::acquire() {
        Ok(guard) => guard,
        Err(single_instance::AcquireError::AlreadyRunning) => {
            eprintln!("tillhost is already running");
            return ExitCode::FAILURE;
        }
        Err(acquire_error) => {
            eprintln!("failed to acquire instance lock: {acquire_error}");
            return ExitCode::FAILURE;
        }
    };

    let (mut shell, mut events) = match Shell::new(&settings) {
        Ok(parts) => parts,
        Err(shell_error) => {
            error!("Failed to assemble the shell: {shell_error}");
            eprintln!("tillhost failed to start: {shell_error}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(boot_error) = shell.boot().await {
        // Database-mode failures during boot are fatal: without a working
        // backend there is nothing for the UI to talk to.
        error!("Backend boot failed: {boot_error}");
        eprintln!("tillhost could not start its backend: {boot_error}");
        return ExitCode::FAILURE;
    }

    let update_check = tokio::time::sleep(shell.update_check_delay());
    tokio::pin!(update_check);
    let mut update_checked = false;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
            () = &mut update_check, if !update_checked => {
                update_checked = true;
                match shell.check_for_updates().await {
                    Ok(decision) if decision.available => {
                        info!(
                            "Update {} available; awaiting user decision",
                            decision.target_version
                        );
                    }
                    Ok(_) => {}
                    // A dead feed must never take the shell down.
                    Err(check_error) => warn!("Update check failed: {check_error}"),
                }
            }
            event = events.recv() => {
                match event {
                    Some(SupervisorEvent::BackendCrashed { code }) => {
                        error!("Backend crashed (exit code {code:?}); shutting down");
                        break;
                    }
                    Some(other) => debug!("Supervisor event: {other:?}"),
                    None => break,
                }
            }
        }
    }

    shell.shutdown().await;
    ExitCode::SUCCESS
}
