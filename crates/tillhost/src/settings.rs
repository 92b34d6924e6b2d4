use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tillhost_backend::{BackendLaunchConfig, DbCredentials};
use tillhost_platform::AppPaths;

/// Connection parameters for the primary database engine.
///
/// These live in the settings document so deployments inject their own
/// credentials; the shell carries no literals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_user")]
    pub user: String,

    /// Empty until configured; an empty password simply fails the probe and
    /// boots the shell on the fallback engine.
    #[serde(default)]
    pub password: String,

    #[serde(default = "default_db_name")]
    pub database: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            host: default_db_host(),
            port: default_db_port(),
            user: default_db_user(),
            password: String::new(),
            database: default_db_name(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Delay between the shell becoming ready and the automatic update check.
    #[serde(default = "default_update_check_delay")]
    pub update_check_delay_secs: u64,

    /// Root of the bundled backend application; the backend runs with this as
    /// its working directory.
    #[serde(default = "default_backend_root")]
    pub backend_root: PathBuf,

    #[serde(default = "default_interpreter")]
    pub interpreter: PathBuf,

    #[serde(default = "default_entry_script")]
    pub entry_script: PathBuf,

    #[serde(default = "default_backend_port")]
    pub backend_port: u16,

    /// The backend configuration document, resolved against `backend_root`
    /// when relative.
    #[serde(default = "default_backend_config_file")]
    pub backend_config_file: PathBuf,

    #[serde(default = "default_startup_grace")]
    pub startup_grace_secs: u64,

    #[serde(default = "default_migration_timeout")]
    pub migration_timeout_secs: u64,

    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub dump_tool: Option<PathBuf>,

    #[serde(default)]
    pub restore_tool: Option<PathBuf>,
}

fn default_db_host() -> String {
    "127.0.0.1".to_string()
}

fn default_db_port() -> u16 {
    3306
}

fn default_db_user() -> String {
    "root".to_string()
}

fn default_db_name() -> String {
    "till_db".to_string()
}

fn default_max_log_size_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_http_timeout() -> u64 {
    10
}

fn default_update_check_delay() -> u64 {
    5
}

fn default_backend_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_interpreter() -> PathBuf {
    PathBuf::from("python")
}

fn default_entry_script() -> PathBuf {
    PathBuf::from("manage.py")
}

fn default_backend_port() -> u16 {
    8000
}

fn default_backend_config_file() -> PathBuf {
    PathBuf::from("config.json")
}

fn default_startup_grace() -> u64 {
    2
}

fn default_migration_timeout() -> u64 {
    120
}

fn default_probe_timeout() -> u64 {
    10
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
            http_timeout_secs: default_http_timeout(),
            update_check_delay_secs: default_update_check_delay(),
            backend_root: default_backend_root(),
            interpreter: default_interpreter(),
            entry_script: default_entry_script(),
            backend_port: default_backend_port(),
            backend_config_file: default_backend_config_file(),
            startup_grace_secs: default_startup_grace(),
            migration_timeout_secs: default_migration_timeout(),
            probe_timeout_secs: default_probe_timeout(),
            database: DatabaseSettings::default(),
            dump_tool: None,
            restore_tool: None,
        }
    }
}

impl AppSettings {
    pub fn load() -> Self {
        let Ok(paths) = AppPaths::new() else {
            return Self::default();
        };
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            match std::fs::read_to_string(&settings_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_default(),
                Err(_) => Self::default(),
            }
        } else {
            Self::default()
        }
    }

    /// Persist the settings document.
    ///
    /// # Errors
    /// Returns an error when the settings directory cannot be created or the
    /// file cannot be written.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let paths = AppPaths::new().map_err(std::io::Error::other)?;
        paths.ensure_dirs()?;

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.settings_file(), content)?;
        Ok(())
    }

    #[must_use]
    pub fn launch_config(&self) -> BackendLaunchConfig {
        let config_file = if self.backend_config_file.is_absolute() {
            self.backend_config_file.clone()
        } else {
            self.backend_root.join(&self.backend_config_file)
        };

        BackendLaunchConfig {
            backend_root: self.backend_root.clone(),
            interpreter: self.interpreter.clone(),
            entry_script: self.entry_script.clone(),
            port: self.backend_port,
            config_file,
            startup_grace: Duration::from_secs(self.startup_grace_secs),
            migration_timeout: Duration::from_secs(self.migration_timeout_secs),
        }
    }

    #[must_use]
    pub fn db_credentials(&self) -> DbCredentials {
        DbCredentials {
            host: self.database.host.clone(),
            port: self.database.port,
            user: self.database.user.clone(),
            password: self.database.password.clone(),
            database: self.database.database.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use serde_json::json;

    use super::AppSettings;

    #[test]
    fn defaults_match_expected_values() {
        let settings = AppSettings::default();

        assert_eq!(settings.backend_port, 8000);
        assert_eq!(settings.update_check_delay_secs, 5);
        assert_eq!(settings.startup_grace_secs, 2);
        assert_eq!(settings.http_timeout_secs, 10);
        assert_eq!(settings.max_log_size_bytes, 5 * 1024 * 1024);
        assert_eq!(settings.database.port, 3306);
        assert!(settings.database.password.is_empty());
        assert!(settings.dump_tool.is_none());
    }

    #[test]
    fn partial_settings_document_fills_in_defaults() {
        let settings: AppSettings = serde_json::from_value(json!({
            "backend_port": 8123,
            "database": { "password": "injected" }
        }))
        .expect("partial settings deserialize");

        assert_eq!(settings.backend_port, 8123);
        assert_eq!(settings.database.password, "injected");
        assert_eq!(settings.database.host, "127.0.0.1");
        assert_eq!(settings.entry_script, PathBuf::from("manage.py"));
    }

    #[test]
    fn launch_config_resolves_relative_config_path_against_backend_root() {
        let settings: AppSettings = serde_json::from_value(json!({
            "backend_root": "/srv/till",
            "backend_config_file": "config.json"
        }))
        .expect("settings deserialize");

        let launch = settings.launch_config();

        assert_eq!(launch.config_file, PathBuf::from("/srv/till/config.json"));
        assert_eq!(launch.backend_root, PathBuf::from("/srv/till"));
        assert_eq!(launch.startup_grace, Duration::from_secs(2));
    }

    #[test]
    fn launch_config_keeps_absolute_config_path() {
        let settings: AppSettings = serde_json::from_value(json!({
            "backend_root": "/srv/till",
            "backend_config_file": "/etc/till/config.json"
        }))
        .expect("settings deserialize");

        assert_eq!(
            settings.launch_config().config_file,
            PathBuf::from("/etc/till/config.json")
        );
    }

    #[test]
    fn credentials_come_from_the_settings_document() {
        let settings: AppSettings = serde_json::from_value(json!({
            "database": {
                "host": "db.internal",
                "port": 3307,
                "user": "till",
                "password": "injected",
                "database": "till_production"
            }
        }))
        .expect("settings deserialize");

        let credentials = settings.db_credentials();

        assert_eq!(credentials.host, "db.internal");
        assert_eq!(credentials.port, 3307);
        assert_eq!(credentials.user, "till");
        assert_eq!(credentials.password, "injected");
        assert_eq!(credentials.database, "till_production");
    }
}
