//! Transport Seam
//!
//! What the device session needs from a radio backend. Every call only
//! *starts* an action; the outcome comes back later as a [`TransportEvent`]
//! on the channel handed to the backend when it was built. Backends must
//! report at most one completion per [`OperationId`].

use crate::domain::models::PeerId;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Identity of one connect attempt. Events tagged with an older link are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

/// Transport-level reference to a characteristic on one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub u16);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(pub u64);

/// Access rights a characteristic advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccessRights {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
}

impl AccessRights {
    pub const READ: Self = Self {
        read: true,
        write: false,
        notify: false,
    };
    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        notify: false,
    };
    pub const READ_NOTIFY: Self = Self {
        read: true,
        write: false,
        notify: true,
    };
}

/// One characteristic exposed by the connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerChannel {
    pub uuid: Uuid,
    pub handle: ChannelHandle,
    pub access: AccessRights,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    Read,
    Write(Vec<u8>),
    EnableNotifications,
}

/// A single transport action, already bound to a resolved handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub id: OperationId,
    pub handle: ChannelHandle,
    pub kind: RequestKind,
}

/// Failure reasons a backend can report for a link or an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    PeerRejected,
    LinkLost,
}

/// Why a backend refused to start an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("no radio backend available")]
    Unavailable,
    #[error("link is not open")]
    NotConnected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    Connected,
    ConnectFailed(TransportFailure),
    /// Link closed; `None` when the local side asked for it.
    Disconnected(Option<TransportFailure>),
    ServicesResolved(Vec<PeerChannel>),
    /// Peer's attribute table changed; all handles on this link are stale.
    ServicesChanged,
    OperationCompleted {
        id: OperationId,
        /// For writes this is the payload that was sent.
        result: Result<Vec<u8>, TransportFailure>,
    },
    Notification {
        handle: ChannelHandle,
        value: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub link: LinkId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(link: LinkId, kind: TransportEventKind) -> Self {
        Self { link, kind }
    }
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Radio backend capability.
pub trait Transport: Send + 'static {
    /// Begin connecting. Reports `Connected` or `ConnectFailed` for `link`.
    fn connect(&mut self, peer: &PeerId, link: LinkId) -> Result<(), TransportError>;

    /// Close the link. Must eventually report `Disconnected` for `link`.
    fn disconnect(&mut self, link: LinkId);

    /// Enumerate the peer's channels. Reports `ServicesResolved`.
    fn discover_services(&mut self, link: LinkId) -> Result<(), TransportError>;

    /// Start one operation. Reports exactly one `OperationCompleted`.
    fn execute(&mut self, link: LinkId, request: TransportRequest) -> Result<(), TransportError>;

    /// Forget any cached attribute table for `peer`.
    fn clear_cache(&mut self, peer: &PeerId);
}

/// Backend for hosts without a supported radio stack.
#[derive(Debug, Default)]
pub struct UnavailableTransport;

impl Transport for UnavailableTransport {
    fn connect(&mut self, _peer: &PeerId, _link: LinkId) -> Result<(), TransportError> {
        Err(TransportError::Unavailable)
    }

    fn disconnect(&mut self, _link: LinkId) {}

    fn discover_services(&mut self, _link: LinkId) -> Result<(), TransportError> {
        Err(TransportError::Unavailable)
    }

    fn execute(&mut self, _link: LinkId, _request: TransportRequest) -> Result<(), TransportError> {
        Err(TransportError::Unavailable)
    }

    fn clear_cache(&mut self, _peer: &PeerId) {}
}
