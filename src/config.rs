use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub static CONFIG: OnceCell<Config> = OnceCell::new();

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub relite: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&'static str; 5] = ["error", "warn", "info", "debug", "trace"];
    const RELITE_LEVEL: &'static str = "info";

    fn default() -> Self {
        LoggingConfig {
            relite: Self::RELITE_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let original = self.relite.clone();
        self.relite = self.relite.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.relite.as_str()) {
            eprintln!(
                "Config error: relite log level of '{}' is invalid - using default of '{}'",
                original,
                Self::RELITE_LEVEL
            );
            self.relite = Self::RELITE_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    pub busy_timeout_ms: u64,
    pub foreign_keys: bool,
}

impl DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            busy_timeout_ms: 5000,
            foreign_keys: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InterchangeConfig {
    /// Rows per transaction during import and per fetch during export.
    pub batch_size: usize,
}

impl InterchangeConfig {
    fn default() -> Self {
        InterchangeConfig { batch_size: 500 }
    }

    fn ensure_valid(&mut self) {
        if self.batch_size == 0 {
            eprintln!("Config error: batch_size of 0 is invalid - using default of 500");
            self.batch_size = 500;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub interchange: InterchangeConfig,
}

impl Config {
    fn default_config() -> Self {
        Config {
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            interchange: InterchangeConfig::default(),
        }
    }

    fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "relite").map(|dirs| dirs.config_local_dir().join("config.toml"))
    }

    /// Loads the configuration from a TOML file, the OS user config location
    /// by default or `path_override` when given. Missing file or parse
    /// failure falls back to defaults; the default file is written out on
    /// first run when no override is in effect. `RELITE_*` environment
    /// variables take precedence over the file.
    pub fn load_config(path_override: Option<&Path>) -> Self {
        let default_config = Config::default_config();
        let config_path = match path_override {
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path(),
        };

        let Some(config_path) = config_path else {
            return default_config;
        };

        // Write the default configuration on first run, but never invent a
        // file at an explicitly requested location.
        if path_override.is_none() && !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!(
                        "Failed to create configuration directory {}: {}",
                        parent.display(),
                        e
                    );
                }
            }
            match toml::to_string_pretty(&default_config) {
                Ok(toml_string) => {
                    if let Err(e) = fs::write(&config_path, toml_string) {
                        eprintln!(
                            "Failed to write default config to {}: {}",
                            config_path.display(),
                            e
                        );
                    }
                }
                Err(_) => eprintln!("Failed to serialize default config."),
            }
        }

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("RELITE_").split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();
        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.interchange.ensure_valid();
    }

    /// Installs the loaded configuration; later calls keep the first value.
    pub fn init(path_override: Option<&Path>) -> &'static Config {
        CONFIG.get_or_init(|| Config::load_config(path_override))
    }

    /// The active configuration; pure defaults when the CLI has not
    /// installed a loaded one (library and test use).
    pub fn current() -> &'static Config {
        CONFIG.get_or_init(Config::default_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::default_config();
        assert_eq!(config.logging.relite, "info");
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert!(config.database.foreign_keys);
        assert_eq!(config.interchange.batch_size, 500);
    }

    #[test]
    fn test_load_config_from_override_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(
            &path,
            "[logging]\nrelite = \"debug\"\n[database]\nbusy_timeout_ms = 100\nforeign_keys = false\n",
        )
        .unwrap();
        let config = Config::load_config(Some(&path));
        assert_eq!(config.logging.relite, "debug");
        assert_eq!(config.database.busy_timeout_ms, 100);
        assert!(!config.database.foreign_keys);
        // Unspecified sections keep their defaults.
        assert_eq!(config.interchange.batch_size, 500);
    }

    #[test]
    fn test_invalid_log_level_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[logging]\nrelite = \"chatty\"\n").unwrap();
        let config = Config::load_config(Some(&path));
        assert_eq!(config.logging.relite, "info");
    }

    #[test]
    fn test_missing_override_file_uses_defaults_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = Config::load_config(Some(&path));
        assert_eq!(config.logging.relite, "info");
        assert!(!path.exists());
    }
}
