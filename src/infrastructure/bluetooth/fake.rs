//! Scripted transport for tests.
//!
//! Records every call. In auto mode it also answers like a well-behaved
//! Blinky peer over the event channel.

use crate::domain::models::PeerId;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    AccessRights, ChannelHandle, EventSender, LinkId, PeerChannel, RequestKind, Transport,
    TransportError, TransportEvent, TransportEventKind, TransportRequest,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Connect(PeerId, LinkId),
    Disconnect(LinkId),
    Discover(LinkId),
    Execute(LinkId, TransportRequest),
    ClearCache(PeerId),
}

#[derive(Debug, Default)]
struct Peer {
    channels: Vec<PeerChannel>,
    values: HashMap<ChannelHandle, Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    calls: Arc<Mutex<Vec<Call>>>,
    unavailable: bool,
    auto: Option<EventSender>,
    peer: Arc<Mutex<Peer>>,
}

pub const ON_OFF_HANDLE: ChannelHandle = ChannelHandle(0x10);
pub const COLOR_HANDLE: ChannelHandle = ChannelHandle(0x12);
pub const BATTERY_HANDLE: ChannelHandle = ChannelHandle(0x14);
pub const MODE_HANDLE: ChannelHandle = ChannelHandle(0x16);

/// Attribute table of a correctly flashed device.
pub fn blinky_channels() -> Vec<PeerChannel> {
    vec![
        PeerChannel {
            uuid: protocol::ON_OFF_CHAR_UUID,
            handle: ON_OFF_HANDLE,
            access: AccessRights::READ_WRITE,
        },
        PeerChannel {
            uuid: protocol::COLOR_CHAR_UUID,
            handle: COLOR_HANDLE,
            access: AccessRights::READ_WRITE,
        },
        PeerChannel {
            uuid: protocol::BATTERY_CHAR_UUID,
            handle: BATTERY_HANDLE,
            access: AccessRights::READ_NOTIFY,
        },
        PeerChannel {
            uuid: protocol::MODE_CHAR_UUID,
            handle: MODE_HANDLE,
            access: AccessRights::READ_WRITE,
        },
    ]
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Answer every call through `events` as a Blinky peer would.
    pub fn responsive(events: EventSender) -> Self {
        let fake = Self {
            auto: Some(events),
            ..Self::default()
        };
        {
            let mut peer = fake.peer.lock().unwrap();
            peer.channels = blinky_channels();
            peer.values.insert(ON_OFF_HANDLE, vec![0x01]);
            peer.values.insert(COLOR_HANDLE, vec![0x10, 0x20, 0x30]);
            peer.values.insert(BATTERY_HANDLE, 3.7_f32.to_le_bytes().to_vec());
            peer.values.insert(MODE_HANDLE, vec![0x02]);
        }
        fake
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<TransportRequest> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Execute(_, request) => Some(request),
                _ => None,
            })
            .collect()
    }

    pub fn last_link(&self) -> Option<LinkId> {
        self.calls().into_iter().rev().find_map(|call| match call {
            Call::Connect(_, link) => Some(link),
            _ => None,
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn reply(&self, link: LinkId, kind: TransportEventKind) {
        if let Some(events) = &self.auto {
            let _ = events.send(TransportEvent::new(link, kind));
        }
    }
}

impl Transport for FakeTransport {
    fn connect(&mut self, peer: &PeerId, link: LinkId) -> Result<(), TransportError> {
        if self.unavailable {
            return Err(TransportError::Unavailable);
        }
        self.record(Call::Connect(peer.clone(), link));
        self.reply(link, TransportEventKind::Connected);
        Ok(())
    }

    fn disconnect(&mut self, link: LinkId) {
        self.record(Call::Disconnect(link));
        self.reply(link, TransportEventKind::Disconnected(None));
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), TransportError> {
        self.record(Call::Discover(link));
        let channels = self.peer.lock().unwrap().channels.clone();
        self.reply(link, TransportEventKind::ServicesResolved(channels));
        Ok(())
    }

    fn execute(&mut self, link: LinkId, request: TransportRequest) -> Result<(), TransportError> {
        self.record(Call::Execute(link, request.clone()));
        let payload = {
            let mut peer = self.peer.lock().unwrap();
            match &request.kind {
                RequestKind::Read => peer.values.get(&request.handle).cloned().unwrap_or_default(),
                RequestKind::Write(bytes) => {
                    peer.values.insert(request.handle, bytes.clone());
                    bytes.clone()
                }
                RequestKind::EnableNotifications => Vec::new(),
            }
        };
        self.reply(
            link,
            TransportEventKind::OperationCompleted {
                id: request.id,
                result: Ok(payload),
            },
        );
        Ok(())
    }

    fn clear_cache(&mut self, peer: &PeerId) {
        self.record(Call::ClearCache(peer.clone()));
    }
}
