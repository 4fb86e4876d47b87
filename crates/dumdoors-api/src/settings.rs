//! Server settings and game configuration sources.
//!
//! Settings come from the environment. The game configuration is an
//! optional YAML file with a handful of environment overrides on top; it is
//! re-read on `POST /api/v1/admin/config/reload`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use dumdoors_core::config::GameConfig;
use dumdoors_core::error::GameError;

use crate::error::AppError;

/// Environment lookup, injectable for tests.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Process-level settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    /// In-memory stores are used when absent.
    pub database_url: Option<String>,
    pub scoring_service_url: String,
    /// The built-in catalog is used when absent.
    pub scenario_catalog: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub otlp_endpoint: Option<String>,
}

impl Settings {
    /// Reads settings from the process environment.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `PORT` is not a valid port.
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(&env_lookup)
    }

    /// Reads settings through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if `PORT` is not a valid port.
    pub fn from_lookup(lookup: Lookup<'_>) -> Result<Self, AppError> {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| AppError::Config(format!("PORT must be a valid u16: {e}")))?,
            None => 3000,
        };
        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            database_url: lookup("DATABASE_URL"),
            scoring_service_url: lookup("SCORING_SERVICE_URL")
                .unwrap_or_else(|| "http://localhost:8000".to_string()),
            scenario_catalog: lookup("SCENARIO_CATALOG").map(PathBuf::from),
            config_path: lookup("DUMDOORS_CONFIG").map(PathBuf::from),
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

/// Where the game configuration is loaded from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSource {
    path: Option<PathBuf>,
}

impl ConfigSource {
    #[must_use]
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Loads the file, if any, then applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns `GameError::Validation` for an unreadable or inconsistent
    /// configuration.
    pub fn load(&self) -> Result<GameConfig, GameError> {
        load_game_config(self.path.as_deref(), &env_lookup)
    }
}

fn parse_override<T: FromStr>(lookup: Lookup<'_>, name: &str) -> Result<Option<T>, GameError> {
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| GameError::Validation(format!("{name} must be a number, got {raw:?}")))
        })
        .transpose()
}

/// Builds the game configuration from an optional YAML file and the
/// override variables.
///
/// # Errors
///
/// Returns `GameError::Validation` if the file cannot be read or parsed, an
/// override is not a number, or the result is inconsistent.
pub fn load_game_config(path: Option<&Path>, lookup: Lookup<'_>) -> Result<GameConfig, GameError> {
    let mut config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                GameError::Validation(format!("cannot read config {}: {e}", path.display()))
            })?;
            GameConfig::from_yaml_str(&text)?
        }
        None => GameConfig::default(),
    };

    if let Some(v) = parse_override(lookup, "SCORE_THRESHOLD_POOR_MAX")? {
        config.thresholds.poor_max = v;
    }
    if let Some(v) = parse_override(lookup, "SCORE_THRESHOLD_EXCELLENT_MIN")? {
        config.thresholds.excellent_min = v;
    }
    if let Some(v) = parse_override(lookup, "MIN_PATH_NODES")? {
        config.path.min_nodes = v;
    }
    if let Some(v) = parse_override(lookup, "MAX_PATH_NODES")? {
        config.path.max_nodes = v;
    }
    if let Some(v) = parse_override(lookup, "DEFAULT_PATH_NODES")? {
        config.path.default_nodes = v;
    }
    if let Some(v) = parse_override(lookup, "RESPONSE_TIMEOUT_SECS")? {
        config.rounds.response_timeout_secs = v;
    }
    if let Some(v) = parse_override(lookup, "SCORING_TIMEOUT_MS")? {
        config.scoring.call_timeout_ms = v;
    }

    config.validate()?;
    Ok(config)
}
