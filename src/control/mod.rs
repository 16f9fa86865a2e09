//! # Control Queue
//!
//! Single-slot, latest-value-wins hand-off between the data channel (producer)
//! and the serial writer (consumer).
//!
//! A live control loop only cares about the freshest throttle/steering
//! setpoint. When the serial writer falls behind the operator's send rate,
//! intermediate commands are overwritten instead of queued, so the motor
//! controller never replays stale input.

use std::sync::Mutex;
use tokio::sync::Notify;

use crate::protocol::datachannel::ControlCommand;

/// Latest-command-wins buffer
#[derive(Debug, Default)]
pub struct ControlQueue {
    slot: Mutex<Option<ControlCommand>>,
    available: Notify,
}

impl ControlQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a command, replacing any value not yet consumed
    ///
    /// Never blocks and never fails.
    pub fn push(&self, command: ControlCommand) {
        let superseded = self.lock_slot().replace(command);
        if let Some(old) = superseded {
            tracing::trace!("Superseded unconsumed command {:?}", old);
        }
        self.available.notify_one();
    }

    /// Wait for a command and take it
    ///
    /// Returns the most recent command pushed since the previous `pop`.
    pub async fn pop(&self) -> ControlCommand {
        loop {
            if let Some(command) = self.try_pop() {
                return command;
            }
            // A push between `try_pop` and here leaves a permit behind,
            // so this wakes immediately instead of missing it.
            self.available.notified().await;
        }
    }

    /// Take the pending command, if any, without waiting
    pub fn try_pop(&self) -> Option<ControlCommand> {
        self.lock_slot().take()
    }

    /// Drop the pending command, if any
    pub fn clear(&self) {
        self.lock_slot().take();
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Option<ControlCommand>> {
        // The slot holds plain data; a poisoned lock still contains a valid value.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
