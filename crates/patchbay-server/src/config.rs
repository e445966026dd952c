//! Server configuration.

use anyhow::Result;
use patchbay_core::EngineConfig;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub engine: EngineSettings,
}

/// Engine tuning, as it appears in the config file. Durations are
/// plain millisecond integers in TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_high_watermark")]
    pub high_watermark_bytes: u64,
    #[serde(default = "default_low_watermark")]
    pub low_watermark_bytes: u64,
    #[serde(default = "default_read_buffer")]
    pub read_buffer_bytes: usize,
    #[serde(default = "default_spawn_attempts")]
    pub spawn_attempts: u32,
    #[serde(default = "default_spawn_timeout_ms")]
    pub spawn_timeout_ms: u64,
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
    #[serde(default = "default_scrollback_bytes")]
    pub scrollback_bytes: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_host() -> String {
    // Spawning arbitrary commands over HTTP; loopback unless deployed
    // behind something that authenticates.
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_high_watermark() -> u64 {
    512 * 1024
}

fn default_low_watermark() -> u64 {
    128 * 1024
}

fn default_read_buffer() -> usize {
    4096
}

fn default_spawn_attempts() -> u32 {
    3
}

fn default_spawn_timeout_ms() -> u64 {
    10_000
}

fn default_close_grace_ms() -> u64 {
    100
}

fn default_scrollback_bytes() -> usize {
    512 * 1024
}

fn default_event_capacity() -> usize {
    256
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            engine: EngineSettings::default(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            high_watermark_bytes: default_high_watermark(),
            low_watermark_bytes: default_low_watermark(),
            read_buffer_bytes: default_read_buffer(),
            spawn_attempts: default_spawn_attempts(),
            spawn_timeout_ms: default_spawn_timeout_ms(),
            close_grace_ms: default_close_grace_ms(),
            scrollback_bytes: default_scrollback_bytes(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        EngineConfig {
            high_watermark: settings.high_watermark_bytes,
            low_watermark: settings.low_watermark_bytes,
            read_buffer_bytes: settings.read_buffer_bytes,
            spawn_attempts: settings.spawn_attempts,
            spawn_timeout: Duration::from_millis(settings.spawn_timeout_ms),
            close_grace: Duration::from_millis(settings.close_grace_ms),
            scrollback_bytes: settings.scrollback_bytes,
            event_capacity: settings.event_capacity,
        }
    }
}

impl Config {
    /// Load config from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from the default location (config/default.toml) or
    /// fall back to defaults.
    pub fn load() -> Result<Self> {
        let config_path = Path::new("config/default.toml");
        if config_path.exists() {
            return Self::load_from(config_path);
        }
        Ok(Config::default())
    }

    /// Reject settings the engine cannot operate under.
    pub fn validate(&self) -> Result<()> {
        if self.engine.low_watermark_bytes >= self.engine.high_watermark_bytes {
            anyhow::bail!(
                "low_watermark_bytes ({}) must be below high_watermark_bytes ({})",
                self.engine.low_watermark_bytes,
                self.engine.high_watermark_bytes
            );
        }
        if self.engine.read_buffer_bytes == 0 {
            anyhow::bail!("read_buffer_bytes must be nonzero");
        }
        Ok(())
    }
}
