//! Blinky Profile Protocol
//!
//! Profile identifiers and the wire codecs for the four channels.
//!
//! ```text
//! Channel  | Length | Encoding
//! ---------+--------+-----------------------------------------
//! OnOff    | 1      | 0x00 = off, any nonzero = on
//! Color    | 3      | R, G, B (0-255 each), opaque
//! Mode     | 1      | opcode = mode index
//! Battery  | 4      | IEEE-754 f32 little-endian, volts
//! ```
//!
//! Decoders reject any length mismatch outright; there is no partial read.

use crate::domain::error::InvalidPayload;
use crate::domain::models::{Channel, ChannelValue, Rgb};
use uuid::Uuid;

/// Blinky service UUID
pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x198a8000_2ab7_414c_9459_47e3d418a7fd);

/// LED enable / disable toggle
pub const ON_OFF_CHAR_UUID: Uuid = Uuid::from_u128(0x198a8001_2ab7_414c_9459_47e3d418a7fd);

/// Primary RGB setting
pub const COLOR_CHAR_UUID: Uuid = Uuid::from_u128(0x198a8002_2ab7_414c_9459_47e3d418a7fd);

/// Battery voltage, readable and notifying
pub const BATTERY_CHAR_UUID: Uuid = Uuid::from_u128(0x198a8003_2ab7_414c_9459_47e3d418a7fd);

/// Lighting mode index
pub const MODE_CHAR_UUID: Uuid = Uuid::from_u128(0x198a8005_2ab7_414c_9459_47e3d418a7fd);

pub const ON_OFF_LEN: usize = 1;
pub const COLOR_LEN: usize = 3;
pub const MODE_LEN: usize = 1;
pub const BATTERY_LEN: usize = 4;

/// Battery voltage shown as empty.
pub const BATTERY_EMPTY_VOLTS: f32 = 3.0;
/// Battery voltage shown as full.
pub const BATTERY_FULL_VOLTS: f32 = 4.2;

/// Step of the batch that runs once the profile has been validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    EnableNotifications,
    Read,
}

/// Initialization batch, executed strictly in this order.
pub const INIT_SEQUENCE: [(InitStep, Channel); 4] = [
    (InitStep::EnableNotifications, Channel::Battery),
    (InitStep::Read, Channel::OnOff),
    (InitStep::Read, Channel::Color),
    (InitStep::Read, Channel::Battery),
];

pub fn char_uuid(channel: Channel) -> Uuid {
    match channel {
        Channel::OnOff => ON_OFF_CHAR_UUID,
        Channel::Color => COLOR_CHAR_UUID,
        Channel::Mode => MODE_CHAR_UUID,
        Channel::Battery => BATTERY_CHAR_UUID,
    }
}

pub fn channel_for_uuid(uuid: Uuid) -> Option<Channel> {
    Channel::ALL.into_iter().find(|c| char_uuid(*c) == uuid)
}

fn exact<const N: usize>(channel: Channel, bytes: &[u8]) -> Result<[u8; N], InvalidPayload> {
    bytes.try_into().map_err(|_| InvalidPayload {
        channel,
        len: bytes.len(),
    })
}

pub fn decode_on_off(bytes: &[u8]) -> Result<bool, InvalidPayload> {
    let [b] = exact::<ON_OFF_LEN>(Channel::OnOff, bytes)?;
    Ok(b != 0)
}

pub fn encode_on_off(on: bool) -> Vec<u8> {
    vec![u8::from(on)]
}

pub fn decode_color(bytes: &[u8]) -> Result<Rgb, InvalidPayload> {
    let [red, green, blue] = exact::<COLOR_LEN>(Channel::Color, bytes)?;
    Ok(Rgb { red, green, blue })
}

pub fn encode_color(rgb: Rgb) -> Vec<u8> {
    vec![rgb.red, rgb.green, rgb.blue]
}

pub fn decode_mode(bytes: &[u8]) -> Result<u8, InvalidPayload> {
    let [mode] = exact::<MODE_LEN>(Channel::Mode, bytes)?;
    Ok(mode)
}

pub fn encode_mode(mode: u8) -> Vec<u8> {
    vec![mode]
}

pub fn decode_battery(bytes: &[u8]) -> Result<f32, InvalidPayload> {
    Ok(f32::from_le_bytes(exact::<BATTERY_LEN>(
        Channel::Battery,
        bytes,
    )?))
}

pub fn encode_battery(volts: f32) -> Vec<u8> {
    volts.to_le_bytes().to_vec()
}

/// Decode a raw payload read from (or echoed by) `channel`.
pub fn decode(channel: Channel, bytes: &[u8]) -> Result<ChannelValue, InvalidPayload> {
    match channel {
        Channel::OnOff => decode_on_off(bytes).map(ChannelValue::OnOff),
        Channel::Color => decode_color(bytes).map(ChannelValue::Color),
        Channel::Mode => decode_mode(bytes).map(ChannelValue::Mode),
        Channel::Battery => decode_battery(bytes).map(ChannelValue::Battery),
    }
}

pub fn encode(value: ChannelValue) -> Vec<u8> {
    match value {
        ChannelValue::OnOff(on) => encode_on_off(on),
        ChannelValue::Color(rgb) => encode_color(rgb),
        ChannelValue::Mode(mode) => encode_mode(mode),
        ChannelValue::Battery(volts) => encode_battery(volts),
    }
}

/// Charge estimate between [`BATTERY_EMPTY_VOLTS`] and [`BATTERY_FULL_VOLTS`], clamped to 0..=100.
pub fn battery_percent(volts: f32) -> u8 {
    let ratio = (volts - BATTERY_EMPTY_VOLTS) / (BATTERY_FULL_VOLTS - BATTERY_EMPTY_VOLTS);
    if ratio.is_nan() {
        return 0;
    }
    (ratio.clamp(0.0, 1.0) * 100.0).round() as u8
}
