//! Backend lifecycle management for tillhost.
//!
//! This crate owns everything between "the shell started" and "the web
//! backend is serving requests":
//! - Probing the primary database engine for reachability.
//! - Rewriting the backend configuration to the local fallback engine.
//! - Running the schema migration when the engine changes.
//! - Launching, monitoring, and terminating the backend server process.

pub mod config;
pub mod error;
pub mod probe;
pub mod process;
pub mod supervisor;

pub use config::{ConfigError, select_fallback_engine};
pub use error::{ProcessError, SupervisorError};
pub use probe::{ConnectivityProbe, DbCredentials, MysqlProbe, ProbeOutcome};
pub use process::{BackendProcessHandle, ProcessExit, run_checked};
pub use supervisor::{
    BackendLaunchConfig, BackendSupervisor, ConnectionState, SupervisorEvent, SupervisorState,
};
