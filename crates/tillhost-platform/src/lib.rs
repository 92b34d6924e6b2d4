//! Platform glue for tillhost.
//!
//! Resolves the per-user application directories and provides the small
//! process-spawning helpers that differ between operating systems.

mod commands;
mod paths;

pub use commands::HideWindow;
pub use paths::{AppPaths, AppPathsError};
