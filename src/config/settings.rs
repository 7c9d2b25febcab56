//! Runtime configuration: loaded once, replaced only through an explicit
//! apply that restarts every timer consuming it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::constants::*;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which alert channels fire on new activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertChannels {
    pub sound: bool,
    pub popup: bool,
    pub email: bool,
    pub title_flash: bool,
}

impl Default for AlertChannels {
    fn default() -> Self {
        Self {
            sound: true,
            popup: true,
            email: true,
            title_flash: true,
        }
    }
}

/// What number an activity alert reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertCount {
    /// Increase since the last known count
    #[default]
    Delta,
    /// The newly observed count
    Total,
}

/// How the isolated probe context is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// Plain fetch-and-parse; the signal must be present in the served HTML
    #[default]
    Http,
    /// Headless browser page; required when the signal is rendered client-side
    Browser,
}

/// How the logged-out condition is recognized in the fetched document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum LoginIndicator {
    Selector(String),
    Pattern(String),
}

impl Default for LoginIndicator {
    fn default() -> Self {
        LoginIndicator::Selector(DEFAULT_LOGIN_SELECTOR.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub mode: ProbeMode,
    pub signal_selector: String,
    pub login_indicator: LoginIndicator,
    pub poll_interval_ms: u64,
    pub inner_timeout_secs: u64,
    pub outer_timeout_secs: u64,
    /// Session cookie sent by the HTTP sandbox
    pub cookie: Option<String>,
    /// Browser profile holding the logged-in session
    pub browser_profile_dir: Option<PathBuf>,
    pub user_agent: Option<String>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            mode: ProbeMode::default(),
            signal_selector: DEFAULT_SIGNAL_SELECTOR.to_string(),
            login_indicator: LoginIndicator::default(),
            poll_interval_ms: PROBE_POLL_INTERVAL_MS,
            inner_timeout_secs: PROBE_INNER_TIMEOUT_SECS,
            outer_timeout_secs: PROBE_OUTER_TIMEOUT_SECS,
            cookie: None,
            browser_profile_dir: None,
            user_agent: None,
        }
    }
}

/// Immutable-within-a-session monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Page carrying the unread signal
    pub target_url: String,
    #[serde(deserialize_with = "lenient_minutes")]
    pub min_interval_minutes: f64,
    #[serde(deserialize_with = "lenient_minutes")]
    pub max_interval_minutes: f64,
    /// Remote collector; validated at send time, not at load time
    pub remote_endpoint: Option<String>,
    pub alert_channels: AlertChannels,
    pub alert_count: AlertCount,
    pub pause_while_typing: bool,
    pub local_staleness_threshold_minutes: f64,
    pub success_marker: String,
    pub status_interval_secs: u64,
    pub probe: ProbeSettings,
    pub state_path: PathBuf,
    pub log_capacity: usize,
    pub metrics_port: Option<u16>,
    /// Icon shown on new-activity popups
    pub notification_icon: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            target_url: String::new(),
            min_interval_minutes: DEFAULT_MIN_INTERVAL_MINUTES,
            max_interval_minutes: DEFAULT_MAX_INTERVAL_MINUTES,
            remote_endpoint: None,
            alert_channels: AlertChannels::default(),
            alert_count: AlertCount::default(),
            pause_while_typing: true,
            local_staleness_threshold_minutes: DEFAULT_STALENESS_THRESHOLD_MINUTES,
            success_marker: DEFAULT_SUCCESS_MARKER.to_string(),
            status_interval_secs: STATUS_PUSH_INTERVAL_SECS,
            probe: ProbeSettings::default(),
            state_path: PathBuf::from("tally-watch-state.json"),
            log_capacity: LOG_CAPACITY,
            metrics_port: None,
            notification_icon: None,
        }
    }
}

impl Configuration {
    /// Returns the configured jitter bounds when they form a usable range
    pub fn interval_bounds(&self) -> Option<(f64, f64)> {
        let (min, max) = (self.min_interval_minutes, self.max_interval_minutes);
        if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max || max > MAX_INTERVAL_MINUTES {
            return None;
        }
        Some((min, max))
    }

    /// Checks the fields the monitor cannot run without
    pub fn validate(&self) -> Result<(), ConfigError> {
        url::Url::parse(&self.target_url)
            .map_err(|e| ConfigError::Invalid(format!("target_url '{}': {}", self.target_url, e)))?;

        if self.probe.signal_selector.trim().is_empty() {
            return Err(ConfigError::Invalid("probe.signal_selector is empty".into()));
        }
        if self.probe.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("probe.poll_interval_ms must be > 0".into()));
        }
        if self.probe.outer_timeout_secs <= self.probe.inner_timeout_secs {
            return Err(ConfigError::Invalid(
                "probe.outer_timeout_secs must exceed probe.inner_timeout_secs".into(),
            ));
        }
        if self.log_capacity == 0 {
            return Err(ConfigError::Invalid("log_capacity must be > 0".into()));
        }
        if self.status_interval_secs == 0 {
            return Err(ConfigError::Invalid("status_interval_secs must be > 0".into()));
        }
        Ok(())
    }
}

/// Read side of the settings surface
pub trait ConfigSource: Send + Sync {
    fn load_current(&self) -> Result<Configuration, ConfigError>;
}

/// Settings stored as a JSON document on disk
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load_current(&self) -> Result<Configuration, ConfigError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        let config: Configuration =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })?;
        tracing::debug!(path = %self.path.display(), "Configuration loaded");
        Ok(config)
    }
}

// * Accepts numbers and numeric strings; anything else becomes NaN so the
// * scheduler falls back to its default range instead of refusing to start.
fn lenient_minutes<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    struct MinutesVisitor;

    impl<'de> Visitor<'de> for MinutesVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number of minutes")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            Ok(v.trim().parse::<f64>().unwrap_or(f64::NAN))
        }

        fn visit_bool<E: de::Error>(self, _v: bool) -> Result<f64, E> {
            Ok(f64::NAN)
        }

        fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
            Ok(f64::NAN)
        }
    }

    deserializer.deserialize_any(MinutesVisitor)
}
