//! # Data Channel Messages
//!
//! JSON messages exchanged with the operator over the peer data channel.
//!
//! Inbound, the operator only ever sends control commands:
//!
//! ```json
//! {"throttle": -120, "steering": 300}
//! ```
//!
//! Outbound, the robot pushes telemetry frames tagged by `type`:
//!
//! ```json
//! {"type": "battery", "voltageA": 1180, "voltageB": 1175}
//! {"type": "phoneState", "battery": 87, "signal": 3, "bandwidthUp": 5000,
//!  "bandwidthDown": 20000, "location": {"latitude": 52.1, "longitude": 4.3, "speed": 1.5}}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Throttle and steering setpoint for the motor controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub throttle: i16,
    pub steering: i16,
}

impl ControlCommand {
    /// Motors stopped, wheels straight
    pub const NEUTRAL: ControlCommand = ControlCommand {
        throttle: 0,
        steering: 0,
    };

    pub fn new(throttle: i16, steering: i16) -> Self {
        Self { throttle, steering }
    }

    /// Decode a control command from a raw data channel message
    ///
    /// Both `throttle` and `steering` must be present and fit in an `i16`;
    /// anything else is rejected as a malformed message.
    ///
    /// # Examples
    ///
    /// ```
    /// use robot_link::protocol::datachannel::ControlCommand;
    ///
    /// let cmd = ControlCommand::from_json(br#"{"throttle": 100, "steering": -20}"#)?;
    /// assert_eq!(cmd, ControlCommand::new(100, -20));
    /// # Ok::<(), robot_link::error::AgentError>(())
    /// ```
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Pair of pack voltages reported by the motor controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryReading {
    pub voltage_a: u16,
    pub voltage_b: u16,
}

/// Last known position of the robot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Ground speed in m/s
    pub speed: Option<f64>,
}

/// Host-side readings polled once per telemetry interval
///
/// Every reading may be unavailable on a given platform; missing readings
/// are sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneState {
    /// Battery charge, percent
    pub battery: Option<i32>,
    /// Cellular signal level (0-4)
    pub signal: Option<i32>,
    pub bandwidth_up: Option<i32>,
    pub bandwidth_down: Option<i32>,
    pub location: Location,
}

/// Telemetry pushed to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryFrame {
    #[serde(rename = "battery")]
    Battery(BatteryReading),
    #[serde(rename = "phoneState")]
    PhoneState(PhoneState),
}

impl TelemetryFrame {
    /// Serialize to the JSON text sent over the data channel
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_control_command() {
        let cmd = ControlCommand::from_json(br#"{"throttle": -1, "steering": 300}"#).unwrap();
        assert_eq!(cmd.throttle, -1);
        assert_eq!(cmd.steering, 300);
    }

    #[test]
    fn test_control_command_missing_key_is_rejected() {
        assert!(ControlCommand::from_json(br#"{"throttle": 10}"#).is_err());
    }

    #[test]
    fn test_control_command_out_of_range_is_rejected() {
        // 40000 does not fit in an i16
        assert!(ControlCommand::from_json(br#"{"throttle": 40000, "steering": 0}"#).is_err());
    }

    #[test]
    fn test_control_command_garbage_is_rejected() {
        assert!(ControlCommand::from_json(b"\xff\xfe").is_err());
        assert!(ControlCommand::from_json(b"[1, 2]").is_err());
    }

    #[test]
    fn test_battery_frame_wire_format() {
        let frame = TelemetryFrame::Battery(BatteryReading {
            voltage_a: 5,
            voltage_b: 10,
        });
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value, json!({"type": "battery", "voltageA": 5, "voltageB": 10}));
    }

    #[test]
    fn test_phone_state_wire_format_with_missing_readings() {
        let frame = TelemetryFrame::PhoneState(PhoneState {
            battery: Some(87),
            ..Default::default()
        });
        let value: serde_json::Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "phoneState",
                "battery": 87,
                "signal": null,
                "bandwidthUp": null,
                "bandwidthDown": null,
                "location": {"latitude": null, "longitude": null, "speed": null}
            })
        );
    }

    #[test]
    fn test_telemetry_frames_decode_back() {
        let frames = [
            TelemetryFrame::Battery(BatteryReading {
                voltage_a: 1180,
                voltage_b: 65535,
            }),
            TelemetryFrame::PhoneState(PhoneState {
                battery: Some(42),
                signal: Some(3),
                bandwidth_up: Some(5000),
                bandwidth_down: None,
                location: Location {
                    latitude: Some(52.5),
                    longitude: Some(-4.25),
                    speed: Some(1.5),
                },
            }),
        ];

        for frame in frames {
            let text = frame.to_json().unwrap();
            let decoded: TelemetryFrame = serde_json::from_str(&text).unwrap();
            assert_eq!(decoded, frame, "frame did not survive JSON: {}", text);
        }
    }
}
