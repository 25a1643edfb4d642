use crate::error::{Result, TourDbError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Upper bound for the recent-uploads window, one hundred years.
pub const MAX_RECENT_WINDOW_DAYS: u32 = 36_500;

/// Engine and server settings.
///
/// Resolved from defaults, then an optional YAML file named by
/// `TOURDB_CONFIG`, then `TOURDB_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_file: PathBuf,
    pub host: String,
    pub port: u16,
    pub default_limit: usize,
    pub max_limit: usize,
    pub recent_window_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_file: PathBuf::from("data/db.json"),
            host: "127.0.0.1".to_string(),
            port: 8080,
            default_limit: 10,
            max_limit: 100,
            recent_window_days: 7,
        }
    }
}

impl Config {
    /// Parse a YAML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Config::default());
        }
        let config: Config = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve the configuration with an arbitrary variable lookup.
    pub fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup("TOURDB_CONFIG") {
            Some(path) => {
                log::info!("Loading config from {path}");
                Config::load(Path::new(&path))?
            }
            None => Config::default(),
        };

        if let Some(v) = lookup("TOURDB_DATA_FILE") {
            config.data_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("TOURDB_HOST") {
            config.host = v;
        }
        if let Some(v) = lookup("TOURDB_PORT") {
            config.port = parse_var("TOURDB_PORT", &v)?;
        }
        if let Some(v) = lookup("TOURDB_DEFAULT_LIMIT") {
            config.default_limit = parse_var("TOURDB_DEFAULT_LIMIT", &v)?;
        }
        if let Some(v) = lookup("TOURDB_MAX_LIMIT") {
            config.max_limit = parse_var("TOURDB_MAX_LIMIT", &v)?;
        }
        if let Some(v) = lookup("TOURDB_RECENT_DAYS") {
            config.recent_window_days = parse_var("TOURDB_RECENT_DAYS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_limit == 0 || self.max_limit == 0 {
            return Err(TourDbError::Config("page limits must be positive".into()));
        }
        if self.default_limit > self.max_limit {
            return Err(TourDbError::Config(format!(
                "default_limit {} exceeds max_limit {}",
                self.default_limit, self.max_limit
            )));
        }
        if self.recent_window_days == 0 || self.recent_window_days > MAX_RECENT_WINDOW_DAYS {
            return Err(TourDbError::Config(format!(
                "recent_window_days must be between 1 and {MAX_RECENT_WINDOW_DAYS}"
            )));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| TourDbError::Config(format!("{name} has an invalid value: '{value}'")))
}
