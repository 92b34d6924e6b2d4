use std::path::Path;

use log::info;
use serde_json::{Value, json};
use thiserror::Error;

/// Engine key written into the fallback database block.
pub const FALLBACK_ENGINE: &str = "sqlite";

/// Filename of the local database file, rooted at the document's `base_dir`.
pub const FALLBACK_DB_FILE: &str = "till.sqlite3";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read backend config: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write backend config: {0}")]
    Write(#[source] std::io::Error),

    #[error("backend config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("backend config has no database block to replace")]
    DatabaseBlockMissing,

    #[error("backend config has no base_dir entry")]
    BaseDirMissing,
}

/// The fixed block the rewrite installs, pointing the backend at the embedded
/// local engine.
#[must_use]
pub fn fallback_database_block(base_dir: &str) -> Value {
    let db_file = Path::new(base_dir).join(FALLBACK_DB_FILE);
    json!({
        "engine": FALLBACK_ENGINE,
        "name": db_file.to_string_lossy(),
    })
}

/// Switch the backend configuration document to the fallback engine.
///
/// The document is parsed, modified, and re-serialized; a config whose
/// `database` block is absent is reported as an anomaly rather than written
/// back untouched. Re-running against an already-switched document rewrites
/// the fallback block to itself.
///
/// # Errors
/// Returns a [`ConfigError`] when the file cannot be read or written, is not
/// valid JSON, or lacks the `database` block or `base_dir` entry.
pub fn select_fallback_engine(config_path: &Path) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(config_path).map_err(ConfigError::Read)?;
    let mut document: Value = serde_json::from_str(&content)?;

    let root = document
        .as_object_mut()
        .ok_or(ConfigError::DatabaseBlockMissing)?;

    let base_dir = root
        .get("base_dir")
        .and_then(Value::as_str)
        .ok_or(ConfigError::BaseDirMissing)?
        .to_owned();

    if !root.contains_key("database") {
        return Err(ConfigError::DatabaseBlockMissing);
    }

    root.insert("database".to_string(), fallback_database_block(&base_dir));

    let serialized = serde_json::to_string_pretty(&document)?;
    std::fs::write(config_path, serialized).map_err(ConfigError::Write)?;

    info!(
        "Backend config at {} now selects the {FALLBACK_ENGINE} engine",
        config_path.display()
    );
    Ok(())
}
