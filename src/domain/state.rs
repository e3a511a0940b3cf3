//! Observable state cells
//!
//! Each cell holds the last published value plus any number of observers.
//! Only the device session holds a [`StatePublisher`]; everything else reads
//! through a [`StateStream`] whose snapshot read never waits on the session.

use crate::domain::models::{Channel, ChannelValue, ConnectionPhase, Rgb};
use tokio::sync::watch;

/// Write side of a state cell.
#[derive(Debug)]
pub struct StatePublisher<T> {
    sender: watch::Sender<T>,
}

impl<T: Clone> StatePublisher<T> {
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Replace the current value and wake observers. Works with zero observers.
    pub fn publish(&self, value: T) {
        self.sender.send_replace(value);
    }

    pub fn current(&self) -> T {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> StateStream<T> {
        StateStream {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Read side of a state cell.
#[derive(Debug, Clone)]
pub struct StateStream<T> {
    receiver: watch::Receiver<T>,
}

impl<T: Clone> StateStream<T> {
    /// Latest published value.
    pub fn get(&self) -> T {
        self.receiver.borrow().clone()
    }

    /// Wait for the next publish and return the new value.
    ///
    /// Returns `None` once the session has gone away.
    pub async fn changed(&mut self) -> Option<T> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}

/// Publishers for the four channel cells. `None` means "not known yet".
#[derive(Debug)]
pub struct ChannelPublishers {
    pub on_off: StatePublisher<Option<bool>>,
    pub color: StatePublisher<Option<Rgb>>,
    pub mode: StatePublisher<Option<u8>>,
    pub battery: StatePublisher<Option<f32>>,
}

impl ChannelPublishers {
    pub fn new() -> Self {
        Self {
            on_off: StatePublisher::new(None),
            color: StatePublisher::new(None),
            mode: StatePublisher::new(None),
            battery: StatePublisher::new(None),
        }
    }

    pub fn publish(&self, value: ChannelValue) {
        match value {
            ChannelValue::OnOff(on) => self.on_off.publish(Some(on)),
            ChannelValue::Color(rgb) => self.color.publish(Some(rgb)),
            ChannelValue::Mode(mode) => self.mode.publish(Some(mode)),
            ChannelValue::Battery(volts) => self.battery.publish(Some(volts)),
        }
    }

    pub fn current(&self, channel: Channel) -> Option<ChannelValue> {
        match channel {
            Channel::OnOff => self.on_off.current().map(ChannelValue::OnOff),
            Channel::Color => self.color.current().map(ChannelValue::Color),
            Channel::Mode => self.mode.current().map(ChannelValue::Mode),
            Channel::Battery => self.battery.current().map(ChannelValue::Battery),
        }
    }

    pub fn subscribe(&self) -> ChannelStreams {
        ChannelStreams {
            on_off: self.on_off.subscribe(),
            color: self.color.subscribe(),
            mode: self.mode.subscribe(),
            battery: self.battery.subscribe(),
        }
    }
}

impl Default for ChannelPublishers {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer handles for all four channels.
#[derive(Debug, Clone)]
pub struct ChannelStreams {
    pub on_off: StateStream<Option<bool>>,
    pub color: StateStream<Option<Rgb>>,
    pub mode: StateStream<Option<u8>>,
    pub battery: StateStream<Option<f32>>,
}

pub type PhaseStream = StateStream<ConnectionPhase>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_before_first_publish() {
        let publishers = ChannelPublishers::new();
        let streams = publishers.subscribe();
        assert_eq!(streams.on_off.get(), None);
        assert_eq!(streams.battery.get(), None);
        assert_eq!(publishers.current(Channel::Color), None);
    }

    #[test]
    fn test_publish_routes_to_matching_cell() {
        let publishers = ChannelPublishers::new();
        let streams = publishers.subscribe();
        publishers.publish(ChannelValue::Color(Rgb::new(1, 2, 3)));
        publishers.publish(ChannelValue::Mode(2));
        assert_eq!(streams.color.get(), Some(Rgb::new(1, 2, 3)));
        assert_eq!(streams.mode.get(), Some(2));
        assert_eq!(streams.on_off.get(), None);
        assert_eq!(
            publishers.current(Channel::Mode),
            Some(ChannelValue::Mode(2))
        );
    }

    #[tokio::test]
    async fn test_observer_sees_change() {
        let publisher = StatePublisher::new(None);
        let mut stream = publisher.subscribe();
        let waiter = tokio::spawn(async move { stream.changed().await });
        tokio::task::yield_now().await;
        publisher.publish(Some(3.7_f32));
        assert_eq!(waiter.await.unwrap(), Some(Some(3.7)));
    }

    #[tokio::test]
    async fn test_changed_ends_when_publisher_dropped() {
        let publisher = StatePublisher::new(0_u8);
        let mut stream = publisher.subscribe();
        drop(publisher);
        assert_eq!(stream.changed().await, None);
        assert_eq!(stream.get(), 0);
    }
}
