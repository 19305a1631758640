use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::Error;
use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// Where the music server lives and how patient we are with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for one request/response round-trip.  Does not apply to
    /// the idle long-poll.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Period of the position refresh while playing.  Sub-second keeps the
    /// progress bar smooth.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: f64,
    /// Seconds without active playback before reverting to the clock.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    /// strftime-style format for the clock view.
    #[serde(default = "default_clock_format")]
    pub clock_format: String,
    #[serde(default = "default_clock_refresh_secs")]
    pub clock_refresh_secs: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout_secs(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            clock_format: default_clock_format(),
            clock_refresh_secs: default_clock_refresh_secs(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6600
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_refresh_interval_secs() -> f64 {
    0.25
}

fn default_inactivity_timeout_secs() -> u64 {
    30
}

fn default_clock_format() -> String {
    "%I:%M %p".to_string()
}

fn default_clock_refresh_secs() -> f64 {
    1.0
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Config {
    /// Load from the default location, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        tracing::debug!("config loaded from {:?}", path);
        Ok(config)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    pub fn validate(&self) -> Result<(), Error> {
        let refresh = self.sync.refresh_interval_secs;
        if !(refresh.is_finite() && refresh > 0.0) {
            return Err(Error::config(format!(
                "sync.refresh_interval_secs must be > 0, got {}",
                refresh
            )));
        }
        if self.sync.inactivity_timeout_secs == 0 {
            return Err(Error::config("sync.inactivity_timeout_secs must be > 0"));
        }
        let clock = self.display.clock_refresh_secs;
        if !(clock.is_finite() && clock > 0.0) {
            return Err(Error::config(format!(
                "display.clock_refresh_secs must be > 0, got {}",
                clock
            )));
        }
        if self.server.timeout_secs == 0 {
            return Err(Error::config("server.timeout_secs must be > 0"));
        }
        Ok(())
    }
}
