//! Long-running loops started next to the coordinator

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ChannelWatch;
use crate::control::ControlQueue;
use crate::protocol::datachannel::TelemetryFrame;
use crate::serial::port_trait::SerialPortIO;
use crate::serial::{MotorSerial, VoltageReader};
use crate::telemetry::{gather_phone_state, TelemetrySource};

/// Pause after a failed serial read before trying again
const READ_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Drain the control queue into the motor controller until cancelled
///
/// Write failures are logged and never stop the loop.
pub async fn run_control_writer<P: SerialPortIO>(
    queue: Arc<ControlQueue>,
    mut serial: MotorSerial<P>,
    cancel: CancellationToken,
) {
    info!("Control writer started on {}", serial.device_path());

    loop {
        let command = tokio::select! {
            _ = cancel.cancelled() => break,
            command = queue.pop() => command,
        };

        if let Err(e) = serial.send_command(&command).await {
            warn!("Failed to send {:?} to motor controller: {}", command, e);
        }
    }

    info!("Control writer stopped");
}

/// Push a `phoneState` frame every `period` while a data channel is open
pub async fn run_telemetry_loop(
    source: Arc<dyn TelemetrySource>,
    channel: ChannelWatch,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let open = channel.borrow().is_some();
        if !open {
            continue;
        }

        let frame = gather_phone_state(source.as_ref()).await;
        send_frame(&channel, &frame).await;
    }

    debug!("Telemetry loop stopped");
}

/// Forward voltage readings from the motor controller until end of stream
///
/// Bytes are decoded whether or not a data channel is open, so frame
/// alignment survives sessions coming and going.
pub async fn run_serial_reader<R: AsyncRead + Unpin>(
    mut reader: VoltageReader<R>,
    channel: ChannelWatch,
    cancel: CancellationToken,
) {
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => break,
            chunk = reader.next_readings() => chunk,
        };

        match chunk {
            Ok(Some(readings)) => {
                for reading in readings {
                    send_frame(&channel, &TelemetryFrame::Battery(reading)).await;
                }
            }
            Ok(None) => {
                warn!("Motor controller closed the serial port");
                break;
            }
            Err(e) => {
                warn!("{}", e);
                tokio::time::sleep(READ_RETRY_DELAY).await;
            }
        }
    }

    debug!("Serial reader stopped");
}

/// Best-effort send on the open data channel; dropped when none is open
async fn send_frame(channel: &ChannelWatch, frame: &TelemetryFrame) {
    let current = channel.borrow().clone();
    let Some(dc) = current else {
        return;
    };

    let text = match frame.to_json() {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to encode telemetry: {}", e);
            return;
        }
    };

    if let Err(e) = dc.send_text(text).await {
        debug!("Telemetry not delivered: {}", e);
    }
}
