//! # Motor Controller Framing
//!
//! Raw byte protocol spoken with the motor controller over the serial link.
//!
//! **Command frame** (robot → controller), 4 bytes:
//!
//! | Byte | Content |
//! |------|---------|
//! | 0 | throttle, low byte |
//! | 1 | throttle, high byte |
//! | 2 | steering, low byte |
//! | 3 | steering, high byte |
//!
//! **Voltage frame** (controller → robot), 4 bytes: `voltageA` then
//! `voltageB`, each a little-endian `u16`.
//!
//! There is no sync byte or delimiter in either direction, so the receiver
//! keeps alignment purely by counting bytes.

use bytes::{Buf, BytesMut};

use super::datachannel::{BatteryReading, ControlCommand};

/// Size of a command frame in bytes
pub const CONTROL_FRAME_LEN: usize = 4;

/// Size of a voltage frame in bytes
pub const VOLTAGE_FRAME_LEN: usize = 4;

/// Encode a control command into a serial frame
///
/// # Examples
///
/// ```
/// use robot_link::protocol::datachannel::ControlCommand;
/// use robot_link::protocol::motor::encode_control_frame;
///
/// let frame = encode_control_frame(&ControlCommand::new(-1, 300));
/// assert_eq!(frame, [0xFF, 0xFF, 0x2C, 0x01]);
/// ```
pub fn encode_control_frame(command: &ControlCommand) -> [u8; CONTROL_FRAME_LEN] {
    let throttle = command.throttle.to_le_bytes();
    let steering = command.steering.to_le_bytes();
    [throttle[0], throttle[1], steering[0], steering[1]]
}

/// Reassembles voltage frames from arbitrarily chunked serial reads
///
/// Serial drivers hand over whatever bytes happen to be available, so a
/// frame may be split across reads or several frames may arrive at once.
/// Incomplete trailing bytes stay buffered until the next read.
#[derive(Debug, Default)]
pub struct VoltageAccumulator {
    buffer: BytesMut,
}

impl VoltageAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly received bytes and drain every complete frame
    ///
    /// # Arguments
    ///
    /// * `data` - Bytes delivered by a single serial read
    ///
    /// # Returns
    ///
    /// * `Vec<BatteryReading>` - Decoded frames in arrival order (possibly empty)
    pub fn push(&mut self, data: &[u8]) -> Vec<BatteryReading> {
        self.buffer.extend_from_slice(data);

        let mut readings = Vec::with_capacity(self.buffer.len() / VOLTAGE_FRAME_LEN);
        while self.buffer.len() >= VOLTAGE_FRAME_LEN {
            let voltage_a = self.buffer.get_u16_le();
            let voltage_b = self.buffer.get_u16_le();
            readings.push(BatteryReading {
                voltage_a,
                voltage_b,
            });
        }
        readings
    }

    /// Number of bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_negative_throttle() {
        let frame = encode_control_frame(&ControlCommand::new(-1, 300));
        assert_eq!(frame, [0xFF, 0xFF, 0x2C, 0x01]);
    }

    #[test]
    fn test_encode_neutral() {
        assert_eq!(encode_control_frame(&ControlCommand::NEUTRAL), [0, 0, 0, 0]);
    }

    #[test]
    fn test_encode_extremes() {
        let frame = encode_control_frame(&ControlCommand::new(i16::MIN, i16::MAX));
        assert_eq!(frame, [0x00, 0x80, 0xFF, 0x7F]);
    }

    #[test]
    fn test_decode_single_frame() {
        let mut acc = VoltageAccumulator::new();
        let readings = acc.push(&[0x05, 0x00, 0x0A, 0x00]);

        assert_eq!(readings, vec![BatteryReading { voltage_a: 5, voltage_b: 10 }]);
        assert_eq!(acc.buffered(), 0, "a complete frame must leave nothing buffered");
    }

    #[test]
    fn test_partial_frame_stays_buffered() {
        let mut acc = VoltageAccumulator::new();
        let readings = acc.push(&[0x05, 0x00, 0x0A]);

        assert!(readings.is_empty());
        assert_eq!(acc.buffered(), 3);
    }

    #[test]
    fn test_frame_split_across_reads() {
        let mut acc = VoltageAccumulator::new();
        assert!(acc.push(&[0x05]).is_empty());
        assert!(acc.push(&[0x00, 0x0A]).is_empty());

        let readings = acc.push(&[0x00, 0xFF]);
        assert_eq!(readings, vec![BatteryReading { voltage_a: 5, voltage_b: 10 }]);
        assert_eq!(acc.buffered(), 1, "the trailing byte starts the next frame");
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut acc = VoltageAccumulator::new();
        let readings = acc.push(&[0x01, 0x00, 0x02, 0x00, 0x34, 0x12, 0xFF, 0xFF, 0x09]);

        assert_eq!(
            readings,
            vec![
                BatteryReading { voltage_a: 1, voltage_b: 2 },
                BatteryReading { voltage_a: 0x1234, voltage_b: 0xFFFF },
            ]
        );
        assert_eq!(acc.buffered(), 1);
    }

    #[test]
    fn test_empty_read() {
        let mut acc = VoltageAccumulator::new();
        assert!(acc.push(&[]).is_empty());
        assert_eq!(acc.buffered(), 0);
    }
}
