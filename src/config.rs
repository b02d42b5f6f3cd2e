use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Bounds and defaults applied to monitored hosts. All fields have defaults,
/// so a config file only needs to mention the ones it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorLimits {
    pub min_interval_seconds: u64,
    pub max_interval_seconds: u64,
    pub default_port: u16,
    pub default_ssh_port: u16,
    pub port_check_timeout_seconds: u64,
    pub ping_timeout_seconds: u64,
    pub max_hosts_per_user: usize,
    pub max_hosts_per_listing: usize,
    /// Users allowed to list jobs across all owners.
    pub admin_user_ids: Vec<i64>,
}

impl Default for MonitorLimits {
    fn default() -> Self {
        Self {
            min_interval_seconds: 120,
            max_interval_seconds: 2400,
            default_port: 80,
            default_ssh_port: 22,
            port_check_timeout_seconds: 1,
            ping_timeout_seconds: 1,
            max_hosts_per_user: 10,
            max_hosts_per_listing: 25,
            admin_user_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// SQLite database URL (e.g. `sqlite://hostwatch.db`). When absent the
    /// daemon falls back to the in-memory store.
    pub database_url: Option<String>,
    /// 32-byte hex key used to encrypt stored SSH credentials.
    pub encryption_key: Option<String>,
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub limits: MonitorLimits,
}

impl AppConfig {
    pub fn load(path_str: &str) -> Result<Self, ConfigError> {
        let path = Path::new(path_str);
        let config_str = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path_str.to_string(),
            source: e,
        })?;
        let mut config: AppConfig = toml::from_str(&config_str).map_err(|e| ConfigError::Parse {
            path: path_str.to_string(),
            source: e,
        })?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Builds a config purely from environment variables and defaults, for
    /// running without a config file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("DATABASE_URL") {
            self.database_url = Some(url);
        }
        if let Ok(key) = env::var("HOSTWATCH_ENCRYPTION_KEY") {
            self.encryption_key = Some(key);
        }
        if let Ok(token) = env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram = Some(TelegramConfig { bot_token: token });
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.min_interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "min_interval_seconds must be greater than zero".to_string(),
            ));
        }
        if limits.min_interval_seconds > limits.max_interval_seconds {
            return Err(ConfigError::Invalid(format!(
                "min_interval_seconds ({}) exceeds max_interval_seconds ({})",
                limits.min_interval_seconds, limits.max_interval_seconds
            )));
        }
        if limits.max_hosts_per_user == 0 {
            return Err(ConfigError::Invalid(
                "max_hosts_per_user must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let limits = MonitorLimits::default();
        assert_eq!(limits.min_interval_seconds, 120);
        assert_eq!(limits.max_interval_seconds, 2400);
        assert_eq!(limits.default_port, 80);
        assert!(limits.min_interval_seconds <= limits.max_interval_seconds);
    }

    #[test]
    fn parses_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            database_url = "sqlite://hostwatch.db"

            [limits]
            max_hosts_per_user = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("sqlite://hostwatch.db"));
        assert_eq!(config.limits.max_hosts_per_user, 3);
        // Unmentioned fields keep their defaults.
        assert_eq!(config.limits.default_port, 80);
    }

    #[test]
    fn rejects_inverted_interval_bounds() {
        let mut config = AppConfig::default();
        config.limits.min_interval_seconds = 500;
        config.limits.max_interval_seconds = 100;
        assert!(config.validate().is_err());
    }
}
