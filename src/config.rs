//! Service configuration.
//!
//! Loaded from a TOML file (path in `HANDOFF_CONFIG`, default `handoff.toml`)
//! after `.env` has been applied. A missing file means "all defaults"; a
//! present but malformed file is an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

const CONFIG_PATH_ENV: &str = "HANDOFF_CONFIG";
const DATABASE_PATH_ENV: &str = "HANDOFF_DATABASE_PATH";
const RUNTIME_API_KEY_ENV: &str = "HANDOFF_RUNTIME_API_KEY";
const DEFAULT_CONFIG_PATH: &str = "handoff.toml";
/// Upper bound for every poller window so the chrono conversions cannot overflow.
const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// How to reach the conversational-AI runtime gateways.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Session poller cadence and windows. All durations in seconds except the
/// creation window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Sessions idle longer than this never get a protocol.
    #[serde(default = "default_creation_window_hours")]
    pub creation_window_hours: u64,
    /// Only sessions updated within this window are scanned for escalation.
    #[serde(default = "default_analysis_window_secs")]
    pub analysis_window_secs: u64,
    #[serde(default = "default_guard_ttl_secs")]
    pub guard_ttl_secs: u64,
    #[serde(default = "default_survey_window_secs")]
    pub survey_window_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_session_concurrency")]
    pub session_concurrency: usize,
    #[serde(default = "default_channel")]
    pub default_channel: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_number_prefix")]
    pub number_prefix: String,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/handoff.db")
}
fn default_scheme() -> String {
    "http".into()
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_interval_secs() -> u64 {
    15
}
fn default_creation_window_hours() -> u64 {
    24
}
fn default_analysis_window_secs() -> u64 {
    5 * 60
}
fn default_guard_ttl_secs() -> u64 {
    30 * 60
}
fn default_survey_window_secs() -> u64 {
    60 * 60
}
fn default_fetch_timeout_secs() -> u64 {
    10
}
fn default_session_concurrency() -> usize {
    4
}
fn default_channel() -> String {
    "whatsapp".into()
}
fn default_number_prefix() -> String {
    "ATD".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            runtime: RuntimeConfig::default(),
            poller: PollerConfig::default(),
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            creation_window_hours: default_creation_window_hours(),
            analysis_window_secs: default_analysis_window_secs(),
            guard_ttl_secs: default_guard_ttl_secs(),
            survey_window_secs: default_survey_window_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            session_concurrency: default_session_concurrency(),
            default_channel: default_channel(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            number_prefix: default_number_prefix(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn creation_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.creation_window_hours as i64)
    }

    pub fn analysis_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.analysis_window_secs as i64)
    }

    pub fn guard_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.guard_ttl_secs as i64)
    }

    pub fn survey_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.survey_window_secs as i64)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl AppConfig {
    /// Load `.env`, then the TOML file, then apply environment overrides.
    pub fn load() -> Result<Self, AppError> {
        // Absent .env is the normal production case.
        let _ = dotenvy::dotenv();

        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            Self::default()
        };

        if let Ok(db) = std::env::var(DATABASE_PATH_ENV) {
            config.database_path = PathBuf::from(db);
        }
        if let Ok(key) = std::env::var(RUNTIME_API_KEY_ENV) {
            if !key.is_empty() {
                config.runtime.api_key = Some(key);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, AppError> {
        toml::from_str(content).map_err(|e| AppError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let p = &self.poller;
        if p.interval_secs == 0 {
            return Err(AppError::Validation("poller.interval_secs must be > 0".into()));
        }
        if p.fetch_timeout_secs == 0 {
            return Err(AppError::Validation("poller.fetch_timeout_secs must be > 0".into()));
        }
        let windows = [
            ("poller.creation_window_hours", p.creation_window_hours.saturating_mul(3600)),
            ("poller.analysis_window_secs", p.analysis_window_secs),
            ("poller.guard_ttl_secs", p.guard_ttl_secs),
            ("poller.survey_window_secs", p.survey_window_secs),
        ];
        for (name, secs) in windows {
            if secs > MAX_WINDOW_SECS {
                return Err(AppError::Validation(format!(
                    "{name} exceeds the maximum of {} days",
                    MAX_WINDOW_SECS / 86_400
                )));
            }
        }
        if p.session_concurrency == 0 {
            return Err(AppError::Validation("poller.session_concurrency must be > 0".into()));
        }
        if p.default_channel.trim().is_empty() {
            return Err(AppError::Validation("poller.default_channel must not be empty".into()));
        }
        if self.protocol.number_prefix.trim().is_empty() {
            return Err(AppError::Validation("protocol.number_prefix must not be empty".into()));
        }
        if !matches!(self.runtime.scheme.as_str(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "runtime.scheme must be http or https, got '{}'",
                self.runtime.scheme
            )));
        }
        Ok(())
    }
}
