use crate::domain::models::Channel;
use thiserror::Error;

/// A payload whose length does not match the channel's wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid {channel} payload: {len} bytes")]
pub struct InvalidPayload {
    pub channel: Channel,
    pub len: usize,
}

/// Errors surfaced by the device session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no Bluetooth transport available")]
    TransportUnavailable,
    #[error("transport timed out")]
    Timeout,
    #[error("peer rejected the request")]
    PeerRejected,
    #[error("link to peer lost")]
    LinkLost,
    #[error("peer does not implement the Blinky profile")]
    ProfileNotSupported,
    #[error("{0} channel is not available on this connection")]
    ChannelUnavailable(Channel),
    #[error(transparent)]
    InvalidPayload(#[from] InvalidPayload),
    #[error("session closed before the operation completed")]
    SessionClosed,
    #[error("not connected")]
    NotConnected,
    #[error("operation queue full ({limit} pending)")]
    QueueSaturated { limit: usize },
}

impl SessionError {
    /// Errors the caller can recover from by reconnecting and retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SessionClosed
                | Self::NotConnected
                | Self::Timeout
                | Self::LinkLost
                | Self::QueueSaturated { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_payload_message() {
        let err = SessionError::from(InvalidPayload {
            channel: Channel::Battery,
            len: 3,
        });
        assert_eq!(err.to_string(), "invalid battery payload: 3 bytes");
        assert!(!err.is_retryable());
        assert!(SessionError::SessionClosed.is_retryable());
    }
}
