//! Blinky Controller
//!
//! Device-session and protocol engine for the Blinky LED accessory.
//! See [`infrastructure::bluetooth`] for the session architecture.

pub mod domain;
pub mod infrastructure;

pub use domain::error::{InvalidPayload, SessionError};
pub use domain::models::{
    Channel, ChannelValue, ConnectionPhase, ControlMode, DisconnectReason, PeerId, Rgb,
};
pub use infrastructure::bluetooth::DeviceSession;
