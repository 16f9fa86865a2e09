//! # Robot Link Library
//!
//! On-robot control-plane agent for a teleoperated vehicle.
//!
//! This library pairs the robot with a remote operator over WebRTC, brokered
//! by a WebSocket signaling relay, and bridges the operator's control
//! commands to a serial motor controller while streaming telemetry back.

pub mod config;
pub mod control;
pub mod error;
pub mod identity;
pub mod media;
pub mod negotiation;
pub mod protocol;
pub mod serial;
pub mod session;
pub mod signaling;
pub mod telemetry;
