use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable transport-level identity of a peer (Bluetooth address or platform id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// The four logical data points exposed by the Blinky profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    OnOff,
    Color,
    Mode,
    Battery,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Self::OnOff, Self::Color, Self::Mode, Self::Battery];

    pub fn name(&self) -> &'static str {
        match self {
            Self::OnOff => "on/off",
            Self::Color => "color",
            Self::Mode => "mode",
            Self::Battery => "battery",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 24-bit color, full opacity implied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Build from a packed `0xAARRGGBB` (or `0xRRGGBB`) value. Alpha is dropped.
    pub const fn from_packed(argb: u32) -> Self {
        Self {
            red: (argb >> 16) as u8,
            green: (argb >> 8) as u8,
            blue: argb as u8,
        }
    }

    /// Packed `0xFFRRGGBB`, opaque.
    pub const fn to_packed(self) -> u32 {
        0xFF00_0000 | (self.red as u32) << 16 | (self.green as u32) << 8 | self.blue as u32
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.red, self.green, self.blue)
    }
}

/// Lighting modes understood by the prop firmware.
///
/// The mode channel carries a raw index; indices outside this list are
/// passed through unchanged as [`ChannelValue::Mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ControlMode {
    DirectRgb = 0,
    DirectRgbPulsing = 1,
    PartyModeFlowing = 2,
    PartyModeRolling = 3,
}

impl ControlMode {
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(Self::DirectRgb),
            1 => Some(Self::DirectRgbPulsing),
            2 => Some(Self::PartyModeFlowing),
            3 => Some(Self::PartyModeRolling),
            _ => None,
        }
    }

    pub fn index(self) -> u8 {
        self as u8
    }
}

/// A decoded, typed channel value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChannelValue {
    OnOff(bool),
    Color(Rgb),
    Mode(u8),
    /// Volts.
    Battery(f32),
}

impl ChannelValue {
    pub fn channel(&self) -> Channel {
        match self {
            Self::OnOff(_) => Channel::OnOff,
            Self::Color(_) => Channel::Color,
            Self::Mode(_) => Channel::Mode,
            Self::Battery(_) => Channel::Battery,
        }
    }
}

/// Why the session ended up in [`ConnectionPhase::Disconnected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Local disconnect request.
    Requested,
    TransportUnavailable,
    Timeout,
    PeerRejected,
    LinkLost,
    /// Peer connected but does not implement the Blinky profile.
    ProfileNotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Disconnected { reason: Option<DisconnectReason> },
    Connecting,
    ServiceDiscovery,
    Validating,
    Initializing,
    Ready,
    Disconnecting,
}

impl ConnectionPhase {
    pub const IDLE: Self = Self::Disconnected { reason: None };

    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// True when the last attempt failed because the peer is the wrong kind of device.
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Self::Disconnected {
                reason: Some(DisconnectReason::ProfileNotSupported)
            }
        )
    }

    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            Self::Disconnected { reason } => *reason,
            _ => None,
        }
    }
}

impl Default for ConnectionPhase {
    fn default() -> Self {
        Self::IDLE
    }
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
