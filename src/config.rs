//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.

use serde::de::Error;
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{AgentError, Result};
use crate::serial::MOTOR_BAUD_RATE;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub webrtc: WebRtcConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Serial port configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SerialConfig {
    /// Device path; empty means auto-detect
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

/// Signaling relay configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SignalingConfig {
    /// Relay endpoint; the device identity is appended as `id` query parameter
    #[serde(default = "default_signaling_url")]
    pub url: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

/// TURN relay entry
#[derive(Debug, Deserialize, Clone)]
pub struct TurnServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

/// Peer connection configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WebRtcConfig {
    #[serde(default = "default_stun_servers")]
    pub stun_servers: Vec<String>,

    #[serde(default)]
    pub turn_servers: Vec<TurnServer>,
}

/// Telemetry configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryConfig {
    #[serde(default = "default_telemetry_interval_ms")]
    pub interval_ms: u64,

    /// sysfs file holding the host battery charge in percent
    #[serde(default = "default_battery_capacity_path")]
    pub battery_capacity_path: String,
}

/// Safety configuration
#[derive(Debug, Deserialize, Clone)]
pub struct SafetyConfig {
    /// Replace any pending command with a neutral one when a session ends
    #[serde(default = "default_stop_on_session_end")]
    pub stop_on_session_end: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Directory for daily rolling log files; empty disables file logging
    #[serde(default)]
    pub directory: String,
}

// Default value functions
fn default_baud_rate() -> u32 { MOTOR_BAUD_RATE }
fn default_write_timeout_ms() -> u64 { 1000 }

fn default_signaling_url() -> String { "ws://127.0.0.1:5003/connect".to_string() }
fn default_reconnect_delay_ms() -> u64 { 1000 }

fn default_stun_servers() -> Vec<String> { vec!["stun:stun.l.google.com:19302".to_string()] }

fn default_telemetry_interval_ms() -> u64 { 1000 }
fn default_battery_capacity_path() -> String { "/sys/class/power_supply/BAT0/capacity".to_string() }

fn default_stop_on_session_end() -> bool { true }

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: default_signaling_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self {
            stun_servers: default_stun_servers(),
            turn_servers: Vec::new(),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_telemetry_interval_ms(),
            battery_capacity_path: default_battery_capacity_path(),
        }
    }
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            stop_on_session_end: default_stop_on_session_end(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing sections and fields fall back to their defaults.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use robot_link::config::Config;
    ///
    /// let config = Config::load("config/robot-link.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    pub fn validate(&self) -> Result<()> {
        if ![9600, 19200, 38400, 57600, 115_200, 230_400, 460_800, 921_600].contains(&self.serial.baud_rate) {
            return Err(invalid("baud_rate must be one of: 9600, 19200, 38400, 57600, 115200, 230400, 460800, 921600"));
        }

        if self.serial.write_timeout_ms == 0 || self.serial.write_timeout_ms > 10_000 {
            return Err(invalid("write_timeout_ms must be between 1 and 10000"));
        }

        // Built without a TLS stack; terminate TLS at the relay's proxy
        if !self.signaling.url.starts_with("ws://") {
            return Err(invalid("signaling url must start with ws://"));
        }

        if self.signaling.reconnect_delay_ms == 0 || self.signaling.reconnect_delay_ms > 60_000 {
            return Err(invalid("reconnect_delay_ms must be between 1 and 60000"));
        }

        for url in &self.webrtc.stun_servers {
            if !(url.starts_with("stun:") || url.starts_with("stuns:")) {
                return Err(invalid(format!("invalid STUN server url: {}", url)));
            }
        }

        for server in &self.webrtc.turn_servers {
            if server.urls.is_empty() {
                return Err(invalid("TURN server needs at least one url"));
            }
            if server.username.is_empty() || server.credential.is_empty() {
                return Err(invalid("TURN servers require username and credential"));
            }
        }

        if self.telemetry.interval_ms < 100 || self.telemetry.interval_ms > 60_000 {
            return Err(invalid("telemetry interval_ms must be between 100 and 60000"));
        }

        Ok(())
    }
}

fn invalid(msg: impl std::fmt::Display) -> AgentError {
    AgentError::Config(toml::de::Error::custom(msg))
}
