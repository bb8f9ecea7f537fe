//! Configuration management for selkies-mirror

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::mirror::MirrorOptions;
use crate::sync::DEFAULT_CONFIRM_ATTEMPTS;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Display being mirrored
    #[serde(default)]
    pub source: SourceConfig,

    /// Destination buffer
    #[serde(default)]
    pub sink: SinkConfig,

    /// Resolution synchronization
    #[serde(default)]
    pub sync: SyncConfig,

    /// Cursor tracking
    #[serde(default)]
    pub cursor: CursorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// X display name, `$DISPLAY` when unset
    pub display: Option<String>,

    /// Screen number, the display's default screen when unset
    pub screen: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Shared sink file
    #[serde(default = "default_sink_path")]
    pub path: PathBuf,

    /// Native width, overrides the value published by the sink owner
    pub native_width: Option<u32>,

    /// Native height, overrides the value published by the sink owner
    pub native_height: Option<u32>,

    /// Create the sink file if it does not exist
    #[serde(default = "default_true")]
    pub create: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            path: default_sink_path(),
            native_width: None,
            native_height: None,
            create: true,
        }
    }
}

impl SinkConfig {
    /// Configured native size, if both dimensions are set
    pub fn native_override(&self) -> Option<(u32, u32)> {
        self.native_width.zip(self.native_height)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Drive the source to the sink's native resolution
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Screen change notifications to wait through for a mode switch
    #[serde(default = "default_confirm_attempts")]
    pub confirm_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            confirm_attempts: DEFAULT_CONFIRM_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorConfig {
    /// Track cursor changes on the source
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Cursor images kept in memory
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for CursorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.sink.path.as_os_str().is_empty() {
            return Err("Sink path must not be empty".into());
        }

        match (self.sink.native_width, self.sink.native_height) {
            (Some(0), _) | (_, Some(0)) => {
                return Err("Sink native dimensions must be non-zero".into());
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err("Sink native_width and native_height must be set together".into());
            }
            _ => {}
        }

        if self.sync.confirm_attempts == 0 {
            return Err("Sync confirm_attempts must be non-zero".into());
        }

        if self.cursor.enabled && self.cursor.cache_capacity == 0 {
            return Err("Cursor cache_capacity must be non-zero".into());
        }

        Ok(())
    }

    pub fn mirror_options(&self) -> MirrorOptions {
        MirrorOptions {
            sync_enabled: self.sync.enabled,
            confirm_attempts: self.sync.confirm_attempts,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_sink_path() -> PathBuf {
    PathBuf::from("/dev/shm/selkies-mirror-sink")
}

fn default_confirm_attempts() -> u32 {
    DEFAULT_CONFIRM_ATTEMPTS
}

fn default_cache_capacity() -> usize {
    32
}

fn default_log_level() -> String {
    "info".to_string()
}
