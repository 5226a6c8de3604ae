use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}

/// Runtime settings for browser sessions and their timing.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TrackerConfig {
    #[serde(default = "default_true")]
    pub headless: bool,

    #[serde(default)]
    pub chrome_executable: Option<PathBuf>,

    #[serde(default = "default_window_width")]
    pub window_width: u32,

    #[serde(default = "default_window_height")]
    pub window_height: u32,

    #[serde(default)]
    pub proxy_server: Option<String>,

    /// Upper bound for loading the landing page.
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_ms: u64,

    /// Wait after the landing page loads, before looking for the search box.
    #[serde(default = "default_landing_settle")]
    pub landing_settle_ms: u64,

    /// Wait after submitting the search, before extracting fields.
    #[serde(default = "default_results_settle")]
    pub results_settle_ms: u64,

    /// Polling budget per search-box selector.
    #[serde(default = "default_search_timeout")]
    pub search_timeout_ms: u64,

    /// Polling budget per field selector.
    #[serde(default = "default_field_timeout")]
    pub field_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub screenshots: bool,
}

fn default_true() -> bool {
    true
}

fn default_window_width() -> u32 {
    1920
}

fn default_window_height() -> u32 {
    1080
}

fn default_navigation_timeout() -> u64 {
    30_000
}

fn default_landing_settle() -> u64 {
    5_000
}

fn default_results_settle() -> u64 {
    8_000
}

fn default_search_timeout() -> u64 {
    1_000
}

fn default_field_timeout() -> u64 {
    500
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            proxy_server: None,
            navigation_timeout_ms: default_navigation_timeout(),
            landing_settle_ms: default_landing_settle(),
            results_settle_ms: default_results_settle(),
            search_timeout_ms: default_search_timeout(),
            field_timeout_ms: default_field_timeout(),
            screenshots: true,
        }
    }
}

impl TrackerConfig {
    /// Defaults overlaid with `PRICETRACK_*`, `CHROME_PATH` and `PROXY_SERVER`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "PRICETRACK_HEADLESS", parse_bool)? {
            config.headless = v;
        }
        if let Some(path) = lookup("CHROME_PATH").filter(|p| !p.trim().is_empty()) {
            config.chrome_executable = Some(PathBuf::from(path));
        }
        if let Some(proxy) = lookup("PROXY_SERVER").filter(|p| !p.trim().is_empty()) {
            config.proxy_server = Some(proxy);
        }
        if let Some(v) = parse_var(&lookup, "PRICETRACK_NAVIGATION_TIMEOUT_MS", parse_num)? {
            config.navigation_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PRICETRACK_LANDING_SETTLE_MS", parse_num)? {
            config.landing_settle_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PRICETRACK_RESULTS_SETTLE_MS", parse_num)? {
            config.results_settle_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PRICETRACK_SEARCH_TIMEOUT_MS", parse_num)? {
            config.search_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PRICETRACK_FIELD_TIMEOUT_MS", parse_num)? {
            config.field_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "PRICETRACK_SCREENSHOTS", parse_bool)? {
            config.screenshots = v;
        }

        Ok(config)
    }

    /// Zero delays and single-probe polling, for driving in-memory pages.
    pub fn immediate() -> Self {
        Self {
            landing_settle_ms: 0,
            results_settle_ms: 0,
            search_timeout_ms: 0,
            field_timeout_ms: 0,
            ..Self::default()
        }
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn landing_settle(&self) -> Duration {
        Duration::from_millis(self.landing_settle_ms)
    }

    pub fn results_settle(&self) -> Duration {
        Duration::from_millis(self.results_settle_ms)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn field_timeout(&self) -> Duration {
        Duration::from_millis(self.field_timeout_ms)
    }
}

fn parse_var<F, T>(
    lookup: &F,
    key: &str,
    parse: fn(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => parse(raw.trim())
            .map(Some)
            .ok_or(ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_num(raw: &str) -> Option<u64> {
    u64::from_str(raw).ok()
}
