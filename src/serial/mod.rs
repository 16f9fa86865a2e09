//! # Serial Communication Module
//!
//! Handles serial communication with the motor controller.
//!
//! This module handles:
//! - Discovering and opening the controller at 115,200 baud (8N1, DTR asserted)
//! - Writing 4-byte command frames with a write deadline
//! - Reading and reassembling 4-byte voltage frames

pub mod port_trait;

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, ReadHalf};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialPortType, SerialStream};
use tracing::{debug, info, warn};

use crate::config::SerialConfig;
use crate::error::{AgentError, Result};
use crate::protocol::datachannel::{BatteryReading, ControlCommand};
use crate::protocol::motor::{encode_control_frame, VoltageAccumulator};
use port_trait::{SerialPortIO, TokioSerialPort};

/// Motor controller baud rate
pub const MOTOR_BAUD_RATE: u32 = 115_200;

/// Fallback device paths to try (in order of preference)
const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // USB CDC devices (Arduino-style controllers)
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Read half of the motor controller port
pub type SerialReader = ReadHalf<SerialStream>;

/// Write side of the motor controller link
///
/// Owned by the control writer loop; the read half is handed to a
/// [`VoltageReader`].
pub struct MotorSerial<P: SerialPortIO = TokioSerialPort> {
    port: P,
    device_path: String,
    write_timeout: Duration,
}

impl<P: SerialPortIO> std::fmt::Debug for MotorSerial<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotorSerial")
            .field("device_path", &self.device_path)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl MotorSerial<TokioSerialPort> {
    /// Open the motor controller described by `config`
    ///
    /// Uses `config.port` when set, otherwise tries every discovered USB
    /// serial port followed by the common fallback paths.
    ///
    /// # Returns
    ///
    /// * `Result<(MotorSerial, SerialReader)>` - Writer and read half of the port
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::DeviceUnavailable`] if no candidate could be opened
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use robot_link::config::SerialConfig;
    /// use robot_link::serial::MotorSerial;
    ///
    /// let (serial, _reader) = MotorSerial::open(&SerialConfig::default())?;
    /// println!("Motor controller at {}", serial.device_path());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn open(config: &SerialConfig) -> Result<(Self, SerialReader)> {
        let paths = if config.port.is_empty() {
            discover_ports()
        } else {
            vec![config.port.clone()]
        };

        Self::open_with_paths(
            &paths,
            config.baud_rate,
            Duration::from_millis(config.write_timeout_ms),
        )
    }

    /// Open the first path in `paths` that accepts the connection
    pub fn open_with_paths(
        paths: &[String],
        baud_rate: u32,
        write_timeout: Duration,
    ) -> Result<(Self, SerialReader)> {
        for path in paths {
            debug!("Trying to open serial port: {}", path);

            match Self::open_port(path, baud_rate) {
                Ok(stream) => {
                    info!("Successfully opened motor controller at {}", path);
                    let (reader, writer) = tokio::io::split(stream);
                    let serial = MotorSerial::with_port(
                        TokioSerialPort::new(writer),
                        path.clone(),
                        write_timeout,
                    );
                    return Ok((serial, reader));
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                    continue;
                }
            }
        }

        Err(AgentError::DeviceUnavailable(paths.join(", ")))
    }

    /// Open a specific serial port with motor controller settings
    fn open_port(path: &str, baud_rate: u32) -> Result<SerialStream> {
        let mut port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| AgentError::Serial(format!("Failed to open {}: {}", path, e)))?;

        // The controller only starts talking once DTR is raised
        port.write_data_terminal_ready(true)
            .map_err(|e| AgentError::Serial(format!("Failed to assert DTR on {}: {}", path, e)))?;

        Ok(port)
    }
}

impl<P: SerialPortIO> MotorSerial<P> {
    /// Wrap an already opened port
    pub fn with_port(port: P, device_path: impl Into<String>, write_timeout: Duration) -> Self {
        Self {
            port,
            device_path: device_path.into(),
            write_timeout,
        }
    }

    /// Send a control command to the motor controller
    ///
    /// # Errors
    ///
    /// - [`AgentError::WriteTimeout`] if the frame was not flushed in time
    /// - [`AgentError::Serial`] on I/O failure
    pub async fn send_command(&mut self, command: &ControlCommand) -> Result<()> {
        let frame = encode_control_frame(command);
        self.write(&frame).await?;
        debug!("Sent control frame {:02X?}", frame);
        Ok(())
    }

    /// Write raw bytes, failing if they are not flushed within the write timeout
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let port = &mut self.port;
        let attempt = async {
            port.write_all(data).await
                .map_err(|e| AgentError::Serial(format!("Failed to write frame: {}", e)))?;
            port.flush().await
                .map_err(|e| AgentError::Serial(format!("Failed to flush serial port: {}", e)))
        };

        match tokio::time::timeout(self.write_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::WriteTimeout(self.write_timeout.as_millis() as u64)),
        }
    }

    /// Get the device path of the opened serial port
    pub fn device_path(&self) -> &str {
        &self.device_path
    }
}

/// Candidate device paths: USB serial ports reported by the OS, then the
/// fallback paths
pub fn discover_ports() -> Vec<String> {
    let mut paths: Vec<String> = match tokio_serial::available_ports() {
        Ok(ports) => ports
            .into_iter()
            .filter(|p| matches!(p.port_type, SerialPortType::UsbPort(_)))
            .map(|p| p.port_name)
            .collect(),
        Err(e) => {
            debug!("Serial port enumeration failed: {}", e);
            Vec::new()
        }
    };

    for fallback in DEFAULT_DEVICE_PATHS {
        if !paths.iter().any(|p| p == fallback) {
            paths.push((*fallback).to_string());
        }
    }
    paths
}

/// Turns the raw inbound byte stream into voltage readings
pub struct VoltageReader<R> {
    reader: R,
    accumulator: VoltageAccumulator,
    buf: [u8; 64],
}

impl<R: AsyncRead + Unpin> VoltageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            accumulator: VoltageAccumulator::new(),
            buf: [0u8; 64],
        }
    }

    /// Wait for the next chunk of bytes and decode every completed frame
    ///
    /// # Returns
    ///
    /// * `Ok(Some(readings))` - Frames completed by this chunk (may be empty)
    /// * `Ok(None)` - The port reached end of stream
    pub async fn next_readings(&mut self) -> Result<Option<Vec<BatteryReading>>> {
        let n = self.reader.read(&mut self.buf).await
            .map_err(|e| AgentError::Serial(format!("Failed to read serial port: {}", e)))?;

        if n == 0 {
            return Ok(None);
        }

        Ok(Some(self.accumulator.push(&self.buf[..n])))
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.accumulator.buffered()
    }
}
