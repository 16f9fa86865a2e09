//! # Telemetry Module
//!
//! Host-side readings pushed to the operator once per telemetry interval.
//!
//! This module handles:
//! - The pull interface the platform layer implements ([`TelemetrySource`])
//! - A Linux host implementation backed by sysfs ([`HostTelemetrySource`])
//! - Assembling a `phoneState` frame from a source
//!
//! Voltage telemetry from the motor controller is event driven and lives in
//! [`crate::serial::VoltageReader`].

use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::config::TelemetryConfig;
use crate::protocol::datachannel::{Location, PhoneState, TelemetryFrame};

/// Uplink/downlink bandwidth estimate in kbit/s
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bandwidth {
    pub up_kbps: i32,
    pub down_kbps: i32,
}

/// Platform readings; every reading may be unavailable
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Battery charge in percent
    async fn battery_percent(&self) -> Option<i32>;

    /// Cellular signal level (0-4)
    async fn signal_level(&self) -> Option<i32>;

    async fn bandwidth(&self) -> Option<Bandwidth>;

    /// Last known location
    async fn location(&self) -> Option<Location>;
}

/// Poll every reading of `source` into a `phoneState` frame
pub async fn gather_phone_state(source: &dyn TelemetrySource) -> TelemetryFrame {
    let bandwidth = source.bandwidth().await;

    TelemetryFrame::PhoneState(PhoneState {
        battery: source.battery_percent().await,
        signal: source.signal_level().await,
        bandwidth_up: bandwidth.map(|b| b.up_kbps),
        bandwidth_down: bandwidth.map(|b| b.down_kbps),
        location: source.location().await.unwrap_or_default(),
    })
}

/// Readings available on a plain Linux host
///
/// Only the battery is read (from the power-supply class in sysfs); the
/// radio and positioning readings are reported as unavailable.
#[derive(Debug, Clone)]
pub struct HostTelemetrySource {
    battery_capacity_path: PathBuf,
}

impl HostTelemetrySource {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            battery_capacity_path: PathBuf::from(&config.battery_capacity_path),
        }
    }
}

#[async_trait]
impl TelemetrySource for HostTelemetrySource {
    async fn battery_percent(&self) -> Option<i32> {
        match tokio::fs::read_to_string(&self.battery_capacity_path).await {
            Ok(text) => text.trim().parse().ok(),
            Err(e) => {
                debug!("Battery capacity unavailable at {:?}: {}", self.battery_capacity_path, e);
                None
            }
        }
    }

    async fn signal_level(&self) -> Option<i32> {
        None
    }

    async fn bandwidth(&self) -> Option<Bandwidth> {
        None
    }

    async fn location(&self) -> Option<Location> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_gather_phone_state_from_source() {
        let mut source = MockTelemetrySource::new();
        source.expect_battery_percent().return_const(Some(76));
        source.expect_signal_level().return_const(Some(3));
        source.expect_bandwidth().return_const(Some(Bandwidth { up_kbps: 5000, down_kbps: 20000 }));
        source.expect_location().return_const(Some(Location {
            latitude: Some(52.37),
            longitude: Some(4.89),
            speed: Some(0.8),
        }));

        let frame = gather_phone_state(&source).await;
        assert_eq!(
            frame,
            TelemetryFrame::PhoneState(PhoneState {
                battery: Some(76),
                signal: Some(3),
                bandwidth_up: Some(5000),
                bandwidth_down: Some(20000),
                location: Location {
                    latitude: Some(52.37),
                    longitude: Some(4.89),
                    speed: Some(0.8),
                },
            })
        );
    }

    #[tokio::test]
    async fn test_gather_phone_state_with_nothing_available() {
        let mut source = MockTelemetrySource::new();
        source.expect_battery_percent().return_const(None);
        source.expect_signal_level().return_const(None);
        source.expect_bandwidth().return_const(None);
        source.expect_location().return_const(None);

        let frame = gather_phone_state(&source).await;
        assert_eq!(frame, TelemetryFrame::PhoneState(PhoneState::default()));
    }

    #[tokio::test]
    async fn test_host_source_reads_sysfs_capacity() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "64").unwrap();

        let source = HostTelemetrySource::new(&TelemetryConfig {
            interval_ms: 1000,
            battery_capacity_path: file.path().to_string_lossy().into_owned(),
        });

        assert_eq!(source.battery_percent().await, Some(64));
        assert_eq!(source.signal_level().await, None);
    }

    #[tokio::test]
    async fn test_host_source_without_battery() {
        let source = HostTelemetrySource::new(&TelemetryConfig {
            interval_ms: 1000,
            battery_capacity_path: "/nonexistent/capacity".to_string(),
        });

        assert_eq!(source.battery_percent().await, None);
    }
}
