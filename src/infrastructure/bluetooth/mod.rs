//! Bluetooth Module
//!
//! Session and protocol layer for the Blinky accessory.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     DeviceSession                        │
//! │   (handle used by the application; one session task)    │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼──────────────┬──────────────┐
//!         │             │              │              │
//!         ▼             ▼              ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌────────────┐
//! │ Registry  │  │   Queue    │  │ Protocol │  │ Transport  │
//! │           │  │            │  │          │  │            │
//! │ - handles │  │ - FIFO     │  │ - UUIDs  │  │ - WinRT    │
//! │ - validate│  │ - 1 in     │  │ - codecs │  │ - events   │
//! │           │  │   flight   │  │          │  │            │
//! └───────────┘  └────────────┘  └──────────┘  └────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Profile identifiers and channel codecs
//! - [`registry`] - Channel handle resolution and profile validation
//! - [`queue`] - Serialized operation queue
//! - [`transport`] - Radio backend trait and event types
//! - [`session`] - Connection state machine and public handle
//! - `winrt` - Windows GATT transport (Windows only)

pub mod protocol;
pub mod queue;
pub mod registry;
pub mod session;
pub mod transport;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod fake;

pub use session::DeviceSession;
pub use transport::{Transport, TransportEvent, UnavailableTransport};
