//! # Wire Protocols
//!
//! Message formats spoken by the agent on its three links.
//!
//! This module handles:
//! - Signaling relay envelopes (JSON over WebSocket)
//! - Control commands and telemetry on the peer data channel (JSON)
//! - Motor controller frames on the serial port (raw little-endian bytes)

pub mod datachannel;
pub mod motor;
pub mod signaling;
