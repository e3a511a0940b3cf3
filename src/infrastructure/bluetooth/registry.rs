//! Channel Registry
//!
//! Resolves the profile's logical channels to handles on the current link and
//! decides whether the peer is a supported Blinky device.

use crate::domain::error::SessionError;
use crate::domain::models::Channel;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{AccessRights, ChannelHandle, PeerChannel};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChannelEntry {
    handle: ChannelHandle,
    access: AccessRights,
}

/// Outcome of matching the peer's channels against the profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub missing: Vec<Channel>,
    /// Channels that resolved but lack write access the profile requires.
    pub not_writable: Vec<Channel>,
}

impl ValidationResult {
    pub fn is_supported(&self) -> bool {
        self.missing.is_empty() && self.not_writable.is_empty()
    }
}

/// Per-connection channel table. Empty until [`ChannelRegistry::resolve`].
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    entries: [Option<ChannelEntry>; 4],
}

fn slot(channel: Channel) -> usize {
    match channel {
        Channel::OnOff => 0,
        Channel::Color => 1,
        Channel::Mode => 2,
        Channel::Battery => 3,
    }
}

/// Channels the controller writes to as part of normal operation.
fn requires_write(channel: Channel) -> bool {
    matches!(channel, Channel::OnOff | Channel::Color)
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the table from scratch out of the peer's advertised channels.
    pub fn resolve(&mut self, peer_channels: &[PeerChannel]) -> ValidationResult {
        self.invalidate();

        for peer_channel in peer_channels {
            let Some(channel) = protocol::channel_for_uuid(peer_channel.uuid) else {
                trace!("Ignoring foreign characteristic {}", peer_channel.uuid);
                continue;
            };
            let entry = &mut self.entries[slot(channel)];
            if entry.is_none() {
                *entry = Some(ChannelEntry {
                    handle: peer_channel.handle,
                    access: peer_channel.access,
                });
                debug!(
                    "Resolved {} -> {:?} ({:?})",
                    channel, peer_channel.handle, peer_channel.access
                );
            }
        }

        self.validation()
    }

    fn validation(&self) -> ValidationResult {
        let mut result = ValidationResult {
            missing: Vec::new(),
            not_writable: Vec::new(),
        };
        for channel in Channel::ALL {
            match self.entries[slot(channel)] {
                None => result.missing.push(channel),
                Some(entry) if requires_write(channel) && !entry.access.write => {
                    result.not_writable.push(channel)
                }
                Some(_) => {}
            }
        }
        result
    }

    pub fn is_supported(&self) -> bool {
        self.validation().is_supported()
    }

    pub fn is_resolved(&self, channel: Channel) -> bool {
        self.entries[slot(channel)].is_some()
    }

    /// Drop every handle. Nothing resolved before this call may be used again.
    pub fn invalidate(&mut self) {
        self.entries = [None; 4];
    }

    pub fn handle(&self, channel: Channel) -> Result<ChannelHandle, SessionError> {
        self.entries[slot(channel)]
            .map(|entry| entry.handle)
            .ok_or(SessionError::ChannelUnavailable(channel))
    }

    pub fn access(&self, channel: Channel) -> Option<AccessRights> {
        self.entries[slot(channel)].map(|entry| entry.access)
    }

    /// Reverse lookup used to route notifications.
    pub fn channel_for(&self, handle: ChannelHandle) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|c| self.entries[slot(*c)].is_some_and(|entry| entry.handle == handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn blinky_channels() -> Vec<PeerChannel> {
        vec![
            PeerChannel {
                uuid: protocol::ON_OFF_CHAR_UUID,
                handle: ChannelHandle(3),
                access: AccessRights::READ_WRITE,
            },
            PeerChannel {
                uuid: protocol::COLOR_CHAR_UUID,
                handle: ChannelHandle(5),
                access: AccessRights::READ_WRITE,
            },
            PeerChannel {
                uuid: protocol::BATTERY_CHAR_UUID,
                handle: ChannelHandle(7),
                access: AccessRights::READ_NOTIFY,
            },
            PeerChannel {
                uuid: protocol::MODE_CHAR_UUID,
                handle: ChannelHandle(9),
                access: AccessRights::READ_WRITE,
            },
        ]
    }

    #[test]
    fn test_full_profile_is_supported() {
        let mut registry = ChannelRegistry::new();
        let result = registry.resolve(&blinky_channels());
        assert!(result.is_supported());
        assert!(registry.is_supported());
        assert_eq!(registry.handle(Channel::Color), Ok(ChannelHandle(5)));
        assert_eq!(registry.channel_for(ChannelHandle(7)), Some(Channel::Battery));
        assert_eq!(registry.channel_for(ChannelHandle(1)), None);
    }

    #[test]
    fn test_each_missing_channel_is_unsupported() {
        for channel in Channel::ALL {
            let peer: Vec<_> = blinky_channels()
                .into_iter()
                .filter(|c| c.uuid != protocol::char_uuid(channel))
                .collect();
            let mut registry = ChannelRegistry::new();
            let result = registry.resolve(&peer);
            assert!(!result.is_supported(), "{channel} missing");
            assert_eq!(result.missing, vec![channel]);
        }
    }

    #[test]
    fn test_read_only_on_off_or_color_is_unsupported() {
        for channel in [Channel::OnOff, Channel::Color] {
            let mut peer = blinky_channels();
            for c in peer.iter_mut() {
                if c.uuid == protocol::char_uuid(channel) {
                    c.access = AccessRights::READ;
                }
            }
            let mut registry = ChannelRegistry::new();
            let result = registry.resolve(&peer);
            assert_eq!(result.not_writable, vec![channel]);
            assert!(!registry.is_supported());
        }
    }

    #[test]
    fn test_foreign_characteristics_ignored() {
        let mut peer = blinky_channels();
        peer.push(PeerChannel {
            uuid: Uuid::from_u128(0x198a8004_2ab7_414c_9459_47e3d418a7fd),
            handle: ChannelHandle(11),
            access: AccessRights::READ_WRITE,
        });
        let mut registry = ChannelRegistry::new();
        assert!(registry.resolve(&peer).is_supported());
        assert_eq!(registry.channel_for(ChannelHandle(11)), None);
    }

    #[test]
    fn test_invalidate_clears_handles() {
        let mut registry = ChannelRegistry::new();
        registry.resolve(&blinky_channels());
        registry.invalidate();
        assert!(!registry.is_resolved(Channel::OnOff));
        assert_eq!(
            registry.handle(Channel::Battery),
            Err(SessionError::ChannelUnavailable(Channel::Battery))
        );
        assert_eq!(registry.channel_for(ChannelHandle(3)), None);
    }

    #[test]
    fn test_resolve_starts_fresh() {
        let mut registry = ChannelRegistry::new();
        registry.resolve(&blinky_channels());
        let result = registry.resolve(&blinky_channels()[..2]);
        assert_eq!(result.missing, vec![Channel::Mode, Channel::Battery]);
        assert!(registry.handle(Channel::Battery).is_err());
    }
}
