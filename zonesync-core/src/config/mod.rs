//! Configuration for the zone sync engine
//!
//! Defaults, TOML files, and `ZONESYNC_<SECTION>_<KEY>` environment
//! overrides, validated before use.

use crate::core_sync::ConflictPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

mod error;

pub use error::ConfigError;

const ENV_PREFIX: &str = "ZONESYNC";
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

/// Connection to the authoritative server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Authority address (`host:port`)
    pub url: String,

    pub player_id: String,

    pub game_id: String,

    /// Consecutive failed connects before giving up until an explicit connect
    pub max_reconnect_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub reconnect_base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub reconnect_max_delay: Duration,

    /// Fraction of each backoff delay to randomize, in `[0, 1]`
    pub reconnect_jitter: f64,

    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,

    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: Duration,

    /// How long a ping may go unanswered
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,

    /// How long the oldest unsettled zone delta may wait
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,

    pub outbound_queue_capacity: usize,

    /// Connect as soon as the channel starts
    pub auto_connect: bool,
}

/// Reconciliation behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub conflict_policy: ConflictPolicy,

    /// Conflicts kept for inspection; older ones are discarded
    pub max_retained_conflicts: usize,

    /// Capacity of the manager's command queue
    pub command_buffer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    pub json_format: bool,

    pub with_timestamp: bool,

    pub with_target: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:7878".to_string(),
            player_id: String::new(),
            game_id: String::new(),
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_millis(500),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_jitter: 0.2,
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(30),
            outbound_queue_capacity: 256,
            auto_connect: true,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::Server,
            max_retained_conflicts: 32,
            command_buffer: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

fn env_key(section: &str, key: &str) -> String {
    format!("{}_{}_{}", ENV_PREFIX, section, key)
}

fn parse_env<T>(section: &str, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let var = env_key(section, key);
    match env::var(&var) {
        Ok(value) => {
            let parsed: Result<T, T::Err> = value.trim().parse();
            parsed.map(Some).map_err(|e| ConfigError::Env { var, reason: e.to_string(), value })
        }
        Err(_) => Ok(None),
    }
}

fn duration_env(section: &str, key: &str) -> Result<Option<Duration>, ConfigError> {
    let var = env_key(section, key);
    match env::var(&var) {
        Ok(value) => {
            let parsed = humantime_serde::re::humantime::parse_duration(value.trim());
            parsed.map(Some).map_err(|e| ConfigError::Env { var, reason: e.to_string(), value })
        }
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables over the defaults
    ///
    /// Variables follow the pattern `ZONESYNC_<SECTION>_<KEY>`, for example
    /// `ZONESYNC_TRANSPORT_URL=10.0.0.5:7878` or
    /// `ZONESYNC_TRANSPORT_HEARTBEAT_INTERVAL=5s`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay any `ZONESYNC_*` variables onto this configuration
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let t = &mut self.transport;
        if let Some(v) = parse_env("TRANSPORT", "URL")? {
            t.url = v;
        }
        if let Some(v) = parse_env("TRANSPORT", "PLAYER_ID")? {
            t.player_id = v;
        }
        if let Some(v) = parse_env("TRANSPORT", "GAME_ID")? {
            t.game_id = v;
        }
        if let Some(v) = parse_env("TRANSPORT", "MAX_RECONNECT_ATTEMPTS")? {
            t.max_reconnect_attempts = v;
        }
        if let Some(v) = duration_env("TRANSPORT", "RECONNECT_BASE_DELAY")? {
            t.reconnect_base_delay = v;
        }
        if let Some(v) = duration_env("TRANSPORT", "RECONNECT_MAX_DELAY")? {
            t.reconnect_max_delay = v;
        }
        if let Some(v) = parse_env("TRANSPORT", "RECONNECT_JITTER")? {
            t.reconnect_jitter = v;
        }
        if let Some(v) = duration_env("TRANSPORT", "CONNECT_TIMEOUT")? {
            t.connect_timeout = v;
        }
        if let Some(v) = duration_env("TRANSPORT", "HEARTBEAT_INTERVAL")? {
            t.heartbeat_interval = v;
        }
        if let Some(v) = duration_env("TRANSPORT", "HEARTBEAT_TIMEOUT")? {
            t.heartbeat_timeout = v;
        }
        if let Some(v) = duration_env("TRANSPORT", "ACK_TIMEOUT")? {
            t.ack_timeout = v;
        }
        if let Some(v) = parse_env("TRANSPORT", "OUTBOUND_QUEUE_CAPACITY")? {
            t.outbound_queue_capacity = v;
        }
        if let Some(v) = parse_env("TRANSPORT", "AUTO_CONNECT")? {
            t.auto_connect = v;
        }

        if let Some(v) = parse_env::<ConflictPolicy>("SYNC", "CONFLICT_POLICY")? {
            self.sync.conflict_policy = v;
        }
        if let Some(v) = parse_env("SYNC", "MAX_RETAINED_CONFLICTS")? {
            self.sync.max_retained_conflicts = v;
        }
        if let Some(v) = parse_env("SYNC", "COMMAND_BUFFER")? {
            self.sync.command_buffer = v;
        }

        if let Some(v) = parse_env("LOGGING", "LEVEL")? {
            self.logging.level = v;
        }
        if let Some(v) = parse_env("LOGGING", "JSON_FORMAT")? {
            self.logging.json_format = v;
        }
        if let Some(v) = parse_env("LOGGING", "WITH_TIMESTAMP")? {
            self.logging.with_timestamp = v;
        }
        if let Some(v) = parse_env("LOGGING", "WITH_TARGET")? {
            self.logging.with_target = v;
        }
        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;

        let config: Self = toml::from_str(&contents)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transport;
        if t.url.trim().is_empty() {
            return Err(ConfigError::invalid("transport.url", "must not be empty"));
        }
        if t.max_reconnect_attempts == 0 {
            return Err(ConfigError::invalid("transport.max_reconnect_attempts", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&t.reconnect_jitter) {
            return Err(ConfigError::invalid(
                "transport.reconnect_jitter",
                format!("must be within [0, 1], got {}", t.reconnect_jitter),
            ));
        }
        if t.reconnect_base_delay > t.reconnect_max_delay {
            return Err(ConfigError::invalid(
                "transport.reconnect_base_delay",
                "must not exceed transport.reconnect_max_delay",
            ));
        }
        for (field, value) in [
            ("transport.reconnect_base_delay", t.reconnect_base_delay),
            ("transport.connect_timeout", t.connect_timeout),
            ("transport.heartbeat_interval", t.heartbeat_interval),
            ("transport.heartbeat_timeout", t.heartbeat_timeout),
            ("transport.ack_timeout", t.ack_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::invalid(field, "must be a non-zero duration"));
            }
        }
        if t.outbound_queue_capacity == 0 {
            return Err(ConfigError::invalid("transport.outbound_queue_capacity", "must be at least 1"));
        }

        if self.sync.max_retained_conflicts == 0 {
            return Err(ConfigError::invalid("sync.max_retained_conflicts", "must be at least 1"));
        }
        if self.sync.command_buffer == 0 {
            return Err(ConfigError::invalid("sync.command_buffer", "must be at least 1"));
        }

        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("must be one of {}, got '{}'", LOG_LEVELS.join(", "), self.logging.level),
            ));
        }

        Ok(())
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)
            .map_err(|source| ConfigError::Write { path: path.to_path_buf(), source })
    }
}
