//! Device Session
//!
//! Owns the connection state machine for one peer. A single task runs the
//! [`SessionDriver`]; handles talk to it through [`DeviceSession`]. Every
//! command and transport event is handled to completion before the next one
//! is looked at, so the registry, queue and publishers are never touched
//! concurrently.

use crate::domain::error::SessionError;
use crate::domain::models::{
    Channel, ChannelValue, ConnectionPhase, DisconnectReason, MessageSeverity, PeerId, Rgb,
    StatusMessage,
};
use crate::domain::settings::SessionSettings;
use crate::domain::state::{ChannelPublishers, ChannelStreams, PhaseStream, StatePublisher};
use crate::infrastructure::bluetooth::protocol::{self, InitStep, INIT_SEQUENCE};
use crate::infrastructure::bluetooth::queue::{Operation, OperationQueue, OperationResult, Responder};
use crate::infrastructure::bluetooth::registry::ChannelRegistry;
use crate::infrastructure::bluetooth::transport::{
    EventReceiver, LinkId, OperationId, RequestKind, Transport, TransportError, TransportEvent,
    TransportEventKind, TransportFailure, TransportRequest,
};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

impl From<TransportFailure> for SessionError {
    fn from(failure: TransportFailure) -> Self {
        match failure {
            TransportFailure::Timeout => Self::Timeout,
            TransportFailure::PeerRejected => Self::PeerRejected,
            TransportFailure::LinkLost => Self::LinkLost,
        }
    }
}

impl From<TransportFailure> for DisconnectReason {
    fn from(failure: TransportFailure) -> Self {
        match failure {
            TransportFailure::Timeout => Self::Timeout,
            TransportFailure::PeerRejected => Self::PeerRejected,
            TransportFailure::LinkLost => Self::LinkLost,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unavailable => Self::TransportUnavailable,
            TransportError::NotConnected => Self::NotConnected,
        }
    }
}

#[derive(Debug)]
enum Command {
    Connect {
        peer: PeerId,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Reconnect {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect,
    Request {
        channel: Channel,
        kind: RequestKind,
        /// `None` for fire-and-forget requests.
        responder: Option<Responder>,
    },
    Shutdown,
}

/// State machine and resources of one session. Runs inside the session task.
pub struct SessionDriver<T: Transport> {
    transport: T,
    phase: StatePublisher<ConnectionPhase>,
    channels: ChannelPublishers,
    diagnostics: broadcast::Sender<StatusMessage>,
    registry: ChannelRegistry,
    queue: OperationQueue,
    peer: Option<PeerId>,
    link: Option<LinkId>,
    next_link: u64,
    /// Last operation of the initialization batch; `Ready` follows its completion.
    init_last: Option<OperationId>,
}

impl<T: Transport> SessionDriver<T> {
    pub fn new(transport: T, settings: &SessionSettings) -> Self {
        let (diagnostics, _) = broadcast::channel(64);
        // The init batch always has to fit.
        let limit = settings
            .queue_limit()
            .map(|limit| limit.max(INIT_SEQUENCE.len()));
        Self {
            transport,
            phase: StatePublisher::new(ConnectionPhase::IDLE),
            channels: ChannelPublishers::new(),
            diagnostics,
            registry: ChannelRegistry::new(),
            queue: OperationQueue::new(limit),
            peer: None,
            link: None,
            next_link: 1,
            init_last: None,
        }
    }

    pub fn phase(&self) -> ConnectionPhase {
        self.phase.current()
    }

    fn set_phase(&self, phase: ConnectionPhase) {
        if self.phase.current() != phase {
            info!("Connection phase: {:?}", phase);
            self.phase.publish(phase);
        }
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self.diagnostics.send(StatusMessage {
            message: message.into(),
            severity,
        });
    }

    /// Drop everything tied to the current link.
    fn clear_link_state(&mut self) {
        self.queue.drain(&SessionError::SessionClosed);
        self.registry.invalidate();
        self.init_last = None;
    }

    pub fn connect(&mut self, peer: PeerId) -> Result<(), SessionError> {
        self.clear_link_state();
        if let Some(old) = self.link.take() {
            debug!("Abandoning {:?} for new connection attempt", old);
            self.transport.disconnect(old);
        }

        let link = LinkId(self.next_link);
        self.next_link += 1;
        info!("Connecting to {} ({:?})", peer, link);
        self.send_log(format!("Connecting to {}...", peer), MessageSeverity::Info);
        self.peer = Some(peer.clone());
        self.set_phase(ConnectionPhase::Connecting);

        match self.transport.connect(&peer, link) {
            Ok(()) => {
                self.link = Some(link);
                Ok(())
            }
            Err(e) => {
                error!("Transport refused to connect: {}", e);
                self.send_log("Bluetooth is not available", MessageSeverity::Error);
                self.set_phase(ConnectionPhase::Disconnected {
                    reason: Some(DisconnectReason::TransportUnavailable),
                });
                Err(SessionError::TransportUnavailable)
            }
        }
    }

    /// Start over with the last peer, re-running discovery and validation.
    pub fn reconnect(&mut self) -> Result<(), SessionError> {
        let peer = self.peer.clone().ok_or(SessionError::NotConnected)?;
        self.connect(peer)
    }

    pub fn disconnect(&mut self) {
        if self.phase().is_disconnected() {
            return;
        }
        self.set_phase(ConnectionPhase::Disconnecting);
        self.clear_link_state();
        match self.link {
            // Finished when the transport reports the link closed.
            Some(link) => self.transport.disconnect(link),
            None => self.set_phase(ConnectionPhase::Disconnected {
                reason: Some(DisconnectReason::Requested),
            }),
        }
    }

    pub fn shutdown(&mut self) {
        self.clear_link_state();
        if let Some(link) = self.link.take() {
            self.transport.disconnect(link);
        }
        if !self.phase().is_disconnected() {
            self.set_phase(ConnectionPhase::Disconnected {
                reason: Some(DisconnectReason::Requested),
            });
        }
    }

    /// Queue a read or write from outside the session. Only accepted while `Ready`.
    pub fn request(&mut self, channel: Channel, kind: RequestKind, responder: Option<Responder>) {
        if !self.phase().is_ready() {
            match responder {
                Some(responder) => {
                    let _ = responder.send(Err(SessionError::NotConnected));
                }
                None => debug!("Ignoring {:?} on {}: not ready", kind, channel),
            }
            return;
        }
        if let Err(e) = self.queue.submit(channel, kind, responder) {
            warn!("Rejected request on {}: {}", channel, e);
            return;
        }
        self.pump();
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        if self.link != Some(event.link) {
            trace!("Dropping event for stale {:?}: {:?}", event.link, event.kind);
            return;
        }
        let link = event.link;

        match event.kind {
            TransportEventKind::Connected => {
                if self.phase() != ConnectionPhase::Connecting {
                    warn!("Unexpected connect event in {:?}", self.phase());
                    return;
                }
                info!("Link established, discovering services");
                self.set_phase(ConnectionPhase::ServiceDiscovery);
                self.start_discovery(link);
            }
            TransportEventKind::ConnectFailed(failure) => {
                error!("Connection failed: {:?}", failure);
                self.link = None;
                self.clear_link_state();
                self.send_log("Connection failed", MessageSeverity::Error);
                self.set_phase(ConnectionPhase::Disconnected {
                    reason: Some(failure.into()),
                });
            }
            TransportEventKind::Disconnected(failure) => self.on_link_closed(failure),
            TransportEventKind::ServicesResolved(peer_channels) => {
                if self.phase() != ConnectionPhase::ServiceDiscovery {
                    warn!("Unexpected service list in {:?}", self.phase());
                    return;
                }
                self.set_phase(ConnectionPhase::Validating);
                let validation = self.registry.resolve(&peer_channels);
                if validation.is_supported() {
                    self.begin_initialization();
                } else {
                    warn!(
                        "Profile not supported (missing: {:?}, not writable: {:?})",
                        validation.missing, validation.not_writable
                    );
                    self.reject_profile();
                }
            }
            TransportEventKind::ServicesChanged => {
                if matches!(
                    self.phase(),
                    ConnectionPhase::Connecting
                        | ConnectionPhase::Disconnecting
                        | ConnectionPhase::Disconnected { .. }
                ) {
                    return;
                }
                info!("Peer services changed, rediscovering");
                self.clear_link_state();
                self.set_phase(ConnectionPhase::ServiceDiscovery);
                self.start_discovery(link);
            }
            TransportEventKind::OperationCompleted { id, result } => {
                let Some(op) = self.queue.complete(id) else {
                    warn!("Completion for unknown operation {:?}", id);
                    return;
                };
                self.finish_operation(op, result.map_err(SessionError::from));
                self.pump();
            }
            TransportEventKind::Notification { handle, value } => {
                match self.registry.channel_for(handle) {
                    Some(channel) => self.apply(channel, &value),
                    None => debug!("Notification from unknown handle {:?}", handle),
                }
            }
        }
    }

    fn start_discovery(&mut self, link: LinkId) {
        if let Err(e) = self.transport.discover_services(link) {
            error!("Service discovery could not start: {}", e);
            self.transport.disconnect(link);
            self.on_link_closed(Some(TransportFailure::LinkLost));
        }
    }

    fn on_link_closed(&mut self, failure: Option<TransportFailure>) {
        self.link = None;
        self.clear_link_state();
        let reason = match failure {
            Some(failure) => {
                warn!("Link closed: {:?}", failure);
                failure.into()
            }
            None => DisconnectReason::Requested,
        };
        if !self.phase().is_disconnected() {
            self.set_phase(ConnectionPhase::Disconnecting);
        }
        info!("Disconnected from device");
        self.send_log("Disconnected from device", MessageSeverity::Info);
        self.set_phase(ConnectionPhase::Disconnected {
            reason: Some(reason),
        });
    }

    fn reject_profile(&mut self) {
        self.clear_link_state();
        // Stale handles must not survive into the next attempt.
        if let Some(peer) = &self.peer {
            self.transport.clear_cache(peer);
        }
        if let Some(link) = self.link.take() {
            self.transport.disconnect(link);
        }
        self.send_log(
            "Device does not support the Blinky profile",
            MessageSeverity::Error,
        );
        self.set_phase(ConnectionPhase::Disconnected {
            reason: Some(DisconnectReason::ProfileNotSupported),
        });
    }

    fn begin_initialization(&mut self) {
        self.set_phase(ConnectionPhase::Initializing);
        for (step, channel) in INIT_SEQUENCE {
            let kind = match step {
                InitStep::EnableNotifications => RequestKind::EnableNotifications,
                InitStep::Read => RequestKind::Read,
            };
            match self.queue.submit(channel, kind, None) {
                Ok(id) => self.init_last = Some(id),
                Err(e) => error!("Could not queue initialization of {}: {}", channel, e),
            }
        }
        if self.init_last.is_none() {
            self.mark_ready();
            return;
        }
        self.pump();
    }

    fn mark_ready(&mut self) {
        self.set_phase(ConnectionPhase::Ready);
        self.send_log("Ready to use", MessageSeverity::Success);
    }

    /// Start queued operations until one is actually in flight or the queue is empty.
    fn pump(&mut self) {
        loop {
            let Some(op) = self.queue.start_next() else {
                return;
            };
            let (id, channel, kind) = (op.id, op.channel, op.kind.clone());

            let started = match (self.link, self.registry.handle(channel)) {
                (Some(link), Ok(handle)) => self
                    .transport
                    .execute(link, TransportRequest { id, handle, kind })
                    .map_err(SessionError::from),
                (None, _) => Err(SessionError::NotConnected),
                (_, Err(e)) => Err(e),
            };

            match started {
                Ok(()) => return,
                Err(e) => {
                    if let Some(op) = self.queue.abort_in_flight() {
                        self.finish_operation(op, Err(e));
                    }
                }
            }
        }
    }

    fn finish_operation(&mut self, op: Operation, result: OperationResult) {
        let closes_init = self.init_last == Some(op.id);
        match (&op.kind, &result) {
            (RequestKind::EnableNotifications, Ok(_)) => {
                debug!("Notifications enabled on {}", op.channel);
            }
            (_, Ok(bytes)) => self.apply(op.channel, bytes),
            (_, Err(e)) => warn!("{:?} on {} failed: {}", op.kind, op.channel, e),
        }
        op.finish(result);

        if closes_init {
            self.init_last = None;
            if self.phase() == ConnectionPhase::Initializing {
                self.mark_ready();
            }
        }
    }

    /// Decode and publish. Malformed payloads never reach the streams.
    fn apply(&self, channel: Channel, bytes: &[u8]) {
        match protocol::decode(channel, bytes) {
            Ok(value) => {
                debug!("{} <- {:?}", channel, value);
                self.channels.publish(value);
            }
            Err(e) => {
                warn!("Invalid data received: {} ({:02X?})", e, bytes);
                self.send_log(e.to_string(), MessageSeverity::Warning);
            }
        }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut events: EventReceiver) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }
        self.shutdown();
        debug!("Session task finished");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { peer, reply } => {
                let _ = reply.send(self.connect(peer));
            }
            Command::Reconnect { reply } => {
                let _ = reply.send(self.reconnect());
            }
            Command::Disconnect => self.disconnect(),
            Command::Request {
                channel,
                kind,
                responder,
            } => self.request(channel, kind, responder),
            Command::Shutdown => self.shutdown(),
        }
    }
}

/// Cloneable handle to a running session task.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    commands: mpsc::UnboundedSender<Command>,
    phase: PhaseStream,
    channels: ChannelStreams,
    diagnostics: broadcast::Sender<StatusMessage>,
}

impl DeviceSession {
    /// Start the session task. `events` must be the receiver paired with the
    /// sender `transport` reports on.
    pub fn spawn<T: Transport>(
        transport: T,
        events: EventReceiver,
        settings: &SessionSettings,
    ) -> (Self, JoinHandle<()>) {
        let driver = SessionDriver::new(transport, settings);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let session = Self {
            commands,
            phase: driver.phase.subscribe(),
            channels: driver.channels.subscribe(),
            diagnostics: driver.diagnostics.clone(),
        };
        let task = tokio::spawn(driver.run(command_rx, events));
        (session, task)
    }

    pub async fn connect(&self, peer: PeerId) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { peer, reply });
        rx.await.unwrap_or(Err(SessionError::SessionClosed))
    }

    pub async fn reconnect(&self) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Reconnect { reply });
        rx.await.unwrap_or(Err(SessionError::SessionClosed))
    }

    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// Stop the session task, closing any open link.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    pub fn set_on_off(&self, on: bool) {
        info!("Turning LED {}...", if on { "ON" } else { "OFF" });
        self.fire(ChannelValue::OnOff(on));
    }

    pub fn set_color(&self, rgb: Rgb) {
        info!("Sending color {}", rgb);
        self.fire(ChannelValue::Color(rgb));
    }

    pub fn set_mode(&self, mode: u8) {
        info!("Sending mode {}", mode);
        self.fire(ChannelValue::Mode(mode));
    }

    pub fn refresh_battery(&self) {
        self.send(Command::Request {
            channel: Channel::Battery,
            kind: RequestKind::Read,
            responder: None,
        });
    }

    /// Read a channel and wait for the decoded value.
    pub async fn read(&self, channel: Channel) -> Result<ChannelValue, SessionError> {
        let bytes = self.submit(channel, RequestKind::Read).await?;
        Ok(protocol::decode(channel, &bytes)?)
    }

    /// Write a value and wait for the peer to accept it. Returns the echoed value.
    pub async fn write(&self, value: ChannelValue) -> Result<ChannelValue, SessionError> {
        let channel = value.channel();
        let bytes = self
            .submit(channel, RequestKind::Write(protocol::encode(value)))
            .await?;
        Ok(protocol::decode(channel, &bytes)?)
    }

    async fn submit(&self, channel: Channel, kind: RequestKind) -> OperationResult {
        let (responder, rx) = oneshot::channel();
        self.send(Command::Request {
            channel,
            kind,
            responder: Some(responder),
        });
        rx.await.unwrap_or(Err(SessionError::SessionClosed))
    }

    fn fire(&self, value: ChannelValue) {
        self.send(Command::Request {
            channel: value.channel(),
            kind: RequestKind::Write(protocol::encode(value)),
            responder: None,
        });
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Session task is gone");
        }
    }

    pub fn phase(&self) -> PhaseStream {
        self.phase.clone()
    }

    pub fn streams(&self) -> ChannelStreams {
        self.channels.clone()
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<StatusMessage> {
        self.diagnostics.subscribe()
    }
}
