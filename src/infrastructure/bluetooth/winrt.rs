//! WinRT Transport
//!
//! [`Transport`] backed by the Windows GATT client APIs. Each call spawns a
//! task that drives the WinRT async operation and reports back through the
//! session's event channel.

use crate::domain::models::PeerId;
use crate::domain::settings::TransportSettings;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    AccessRights, ChannelHandle, EventSender, LinkId, PeerChannel, RequestKind, Transport,
    TransportError, TransportEvent, TransportEventKind, TransportFailure, TransportRequest,
};
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use windows::core::{IInspectable, GUID};
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus, GattSession,
    GattValueChangedEventArgs,
};
use windows::Devices::Bluetooth::{BluetoothCacheMode, BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter, IBuffer};

struct LinkState {
    link: LinkId,
    peer: PeerId,
    device: Option<BluetoothLEDevice>,
    // Held so Windows keeps the link up between operations.
    gatt_session: Option<GattSession>,
    characteristics: HashMap<ChannelHandle, GattCharacteristic>,
}

#[derive(Default)]
struct Shared {
    current: Option<LinkState>,
    uncached_peers: HashSet<PeerId>,
}

impl Shared {
    fn link_mut(&mut self, link: LinkId) -> Option<&mut LinkState> {
        self.current.as_mut().filter(|state| state.link == link)
    }

    fn release(&mut self, link: LinkId) -> Option<LinkState> {
        if self.link_mut(link).is_some() {
            self.current.take()
        } else {
            None
        }
    }
}

pub struct WinRtTransport {
    events: EventSender,
    settings: TransportSettings,
    shared: Arc<Mutex<Shared>>,
}

impl WinRtTransport {
    pub fn new(events: EventSender, settings: TransportSettings) -> Self {
        Self {
            events,
            settings,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Shared> {
        lock(&self.shared)
    }
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    // State stays consistent even if a task panicked mid-update.
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn send(events: &EventSender, link: LinkId, kind: TransportEventKind) {
    let _ = events.send(TransportEvent::new(link, kind));
}

/// Accepts `AA:BB:CC:DD:EE:FF`, `AABBCCDDEEFF` or `0xAABBCCDDEEFF`.
pub fn parse_address(address: &str) -> Option<u64> {
    let hex: String = address
        .trim()
        .trim_start_matches("0x")
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect();
    if hex.is_empty() || hex.len() > 12 {
        return None;
    }
    u64::from_str_radix(&hex, 16).ok()
}

fn to_guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn to_uuid(guid: GUID) -> Uuid {
    Uuid::from_u128(guid.to_u128())
}

fn status_failure(status: GattCommunicationStatus) -> Option<TransportFailure> {
    if status == GattCommunicationStatus::Success {
        None
    } else if status == GattCommunicationStatus::Unreachable {
        Some(TransportFailure::LinkLost)
    } else {
        Some(TransportFailure::PeerRejected)
    }
}

fn access_rights(properties: GattCharacteristicProperties) -> AccessRights {
    let has = |flag: GattCharacteristicProperties| properties.0 & flag.0 != 0;
    AccessRights {
        read: has(GattCharacteristicProperties::Read),
        write: has(GattCharacteristicProperties::Write),
        notify: has(GattCharacteristicProperties::Notify),
    }
}

fn buffer_bytes(buffer: &IBuffer) -> Result<Vec<u8>> {
    let reader = DataReader::FromBuffer(buffer)?;
    let length = reader.UnconsumedBufferLength()? as usize;
    let mut bytes = vec![0u8; length];
    reader.ReadBytes(&mut bytes)?;
    Ok(bytes)
}

async fn open_device(address: u64) -> Result<(BluetoothLEDevice, Option<GattSession>)> {
    let device = BluetoothLEDevice::FromBluetoothAddressAsync(address)?.await?;
    info!("Device opened: {:?}", device.Name()?);

    let gatt_session = match GattSession::FromDeviceIdAsync(&device.BluetoothDeviceId()?)?.await {
        Ok(session) => {
            session.SetMaintainConnection(true)?;
            debug!("GattSession created, MaintainConnection set to true");
            Some(session)
        }
        Err(e) => {
            warn!("Failed to create GattSession, continuing anyway: {}", e);
            None
        }
    };
    Ok((device, gatt_session))
}

fn watch_device(device: &BluetoothLEDevice, link: LinkId, events: EventSender, shared: Arc<Mutex<Shared>>) -> Result<()> {
    let status_events = events.clone();
    let status_shared = shared.clone();
    device.ConnectionStatusChanged(&TypedEventHandler::new(
        move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    // A local disconnect has already released the link.
                    if lock(&status_shared).release(link).is_some() {
                        send(
                            &status_events,
                            link,
                            TransportEventKind::Disconnected(Some(TransportFailure::LinkLost)),
                        );
                    }
                }
            }
            Ok(())
        },
    ))?;

    device.GattServicesChanged(&TypedEventHandler::new(
        move |_: windows::core::Ref<BluetoothLEDevice>, _: windows::core::Ref<IInspectable>| {
            let mut shared = lock(&shared);
            if let Some(state) = shared.link_mut(link) {
                state.characteristics.clear();
                send(&events, link, TransportEventKind::ServicesChanged);
            }
            Ok(())
        },
    ))?;
    Ok(())
}

async fn discover(
    device: BluetoothLEDevice,
    mode: BluetoothCacheMode,
) -> Result<Vec<(PeerChannel, GattCharacteristic)>> {
    let services = device
        .GetGattServicesForUuidWithCacheModeAsync(to_guid(protocol::SERVICE_UUID), mode)?
        .await?;
    if services.Status()? != GattCommunicationStatus::Success {
        anyhow::bail!("Failed to get GATT services: {:?}", services.Status()?);
    }

    let services = services.Services()?;
    if services.Size()? == 0 {
        warn!("Blinky service not found on device");
        return Ok(Vec::new());
    }
    let service = services.GetAt(0)?;

    let result = service.GetCharacteristicsWithCacheModeAsync(mode)?.await?;
    if result.Status()? != GattCommunicationStatus::Success {
        anyhow::bail!("Failed to get characteristics: {:?}", result.Status()?);
    }

    let characteristics = result.Characteristics()?;
    info!("Found {} characteristics", characteristics.Size()?);
    let mut found = Vec::new();
    for i in 0..characteristics.Size()? {
        let c = characteristics.GetAt(i)?;
        found.push((
            PeerChannel {
                uuid: to_uuid(c.Uuid()?),
                handle: ChannelHandle(c.AttributeHandle()?),
                access: access_rights(c.CharacteristicProperties()?),
            },
            c,
        ));
    }
    Ok(found)
}

async fn read(characteristic: &GattCharacteristic) -> Result<Result<Vec<u8>, TransportFailure>> {
    let result = characteristic
        .ReadValueWithCacheModeAsync(BluetoothCacheMode::Uncached)?
        .await?;
    if let Some(failure) = status_failure(result.Status()?) {
        return Ok(Err(failure));
    }
    Ok(Ok(buffer_bytes(&result.Value()?)?))
}

async fn write(characteristic: &GattCharacteristic, bytes: Vec<u8>) -> Result<Result<Vec<u8>, TransportFailure>> {
    let writer = DataWriter::new()?;
    writer.WriteBytes(&bytes)?;
    let buffer = writer.DetachBuffer()?;
    let result = characteristic.WriteValueWithResultAsync(&buffer)?.await?;
    Ok(match status_failure(result.Status()?) {
        Some(failure) => Err(failure),
        None => Ok(bytes),
    })
}

async fn enable_notifications(
    characteristic: &GattCharacteristic,
    handle: ChannelHandle,
    link: LinkId,
    events: EventSender,
    settings: &TransportSettings,
) -> Result<Result<Vec<u8>, TransportFailure>> {
    let handler = TypedEventHandler::new(
        move |_: windows::core::Ref<GattCharacteristic>,
              args: windows::core::Ref<GattValueChangedEventArgs>| {
            if let Some(args) = args.as_ref() {
                let value = buffer_bytes(&args.CharacteristicValue()?).unwrap_or_default();
                send(&events, link, TransportEventKind::Notification { handle, value });
            }
            Ok(())
        },
    );
    characteristic.ValueChanged(&handler)?;

    let attempts = settings.notification_retries.max(1);
    let mut last = TransportFailure::PeerRejected;
    for attempt in 1..=attempts {
        let status = characteristic
            .WriteClientCharacteristicConfigurationDescriptorAsync(
                GattClientCharacteristicConfigurationDescriptorValue::Notify,
            )?
            .await?;
        match status_failure(status) {
            None => {
                info!("Notifications enabled successfully");
                return Ok(Ok(Vec::new()));
            }
            Some(failure) => {
                warn!(
                    "Notification subscription attempt {}/{} failed: {:?}",
                    attempt, attempts, status
                );
                last = failure;
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(settings.retry_delay_ms)).await;
                }
            }
        }
    }
    error!("Failed to enable notifications after {} attempts", attempts);
    Ok(Err(last))
}

impl Transport for WinRtTransport {
    fn connect(&mut self, peer: &PeerId, link: LinkId) -> Result<(), TransportError> {
        let Some(address) = parse_address(peer.as_str()) else {
            warn!("Not a Bluetooth address: {}", peer);
            send(
                &self.events,
                link,
                TransportEventKind::ConnectFailed(TransportFailure::PeerRejected),
            );
            return Ok(());
        };

        self.lock().current = Some(LinkState {
            link,
            peer: peer.clone(),
            device: None,
            gatt_session: None,
            characteristics: HashMap::new(),
        });

        let events = self.events.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            info!("Connecting to Bluetooth device: {:#X}", address);
            let (device, gatt_session) = match open_device(address).await {
                Ok(opened) => opened,
                Err(e) => {
                    error!("Failed to open device: {}", e);
                    lock(&shared).release(link);
                    send(&events, link, TransportEventKind::ConnectFailed(TransportFailure::Timeout));
                    return;
                }
            };
            if let Err(e) = watch_device(&device, link, events.clone(), shared.clone()) {
                warn!("Could not register device handlers: {}", e);
            }

            let mut guard = lock(&shared);
            match guard.link_mut(link) {
                Some(state) => {
                    state.device = Some(device);
                    state.gatt_session = gatt_session;
                    send(&events, link, TransportEventKind::Connected);
                }
                // Abandoned while opening.
                None => {
                    let _ = device.Close();
                }
            }
        });
        Ok(())
    }

    fn disconnect(&mut self, link: LinkId) {
        let state = self.lock().release(link);
        if let Some(state) = state {
            if let Some(session) = state.gatt_session {
                let _ = session.Close();
            }
            if let Some(device) = state.device {
                let _ = device.Close();
            }
            info!("Disconnected from {}", state.peer);
        }
        send(&self.events, link, TransportEventKind::Disconnected(None));
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), TransportError> {
        let (device, mode) = {
            let mut shared = self.lock();
            let Some(state) = shared.link_mut(link) else {
                return Err(TransportError::NotConnected);
            };
            let device = state.device.clone().ok_or(TransportError::NotConnected)?;
            let peer = state.peer.clone();
            let uncached = shared.uncached_peers.remove(&peer) || self.settings.use_uncached_discovery;
            let mode = if uncached {
                BluetoothCacheMode::Uncached
            } else {
                BluetoothCacheMode::Cached
            };
            (device, mode)
        };

        let events = self.events.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            match discover(device, mode).await {
                Ok(found) => {
                    let mut guard = lock(&shared);
                    let Some(state) = guard.link_mut(link) else {
                        return;
                    };
                    state.characteristics.clear();
                    let mut channels = Vec::with_capacity(found.len());
                    for (channel, characteristic) in found {
                        state.characteristics.insert(channel.handle, characteristic);
                        channels.push(channel);
                    }
                    send(&events, link, TransportEventKind::ServicesResolved(channels));
                }
                Err(e) => {
                    error!("Service discovery failed: {}", e);
                    lock(&shared).release(link);
                    send(
                        &events,
                        link,
                        TransportEventKind::Disconnected(Some(TransportFailure::LinkLost)),
                    );
                }
            }
        });
        Ok(())
    }

    fn execute(&mut self, link: LinkId, request: TransportRequest) -> Result<(), TransportError> {
        let characteristic = {
            let mut shared = self.lock();
            let state = shared.link_mut(link).ok_or(TransportError::NotConnected)?;
            state
                .characteristics
                .get(&request.handle)
                .cloned()
                .ok_or(TransportError::NotConnected)?
        };

        let events = self.events.clone();
        let settings = self.settings.clone();
        tokio::spawn(async move {
            let outcome = match request.kind {
                RequestKind::Read => read(&characteristic).await,
                RequestKind::Write(bytes) => write(&characteristic, bytes).await,
                RequestKind::EnableNotifications => {
                    enable_notifications(&characteristic, request.handle, link, events.clone(), &settings).await
                }
            };
            let result = outcome.unwrap_or_else(|e| {
                error!("GATT operation {:?} failed: {}", request.id, e);
                Err(TransportFailure::LinkLost)
            });
            send(
                &events,
                link,
                TransportEventKind::OperationCompleted {
                    id: request.id,
                    result,
                },
            );
        });
        Ok(())
    }

    fn clear_cache(&mut self, peer: &PeerId) {
        debug!("Next discovery for {} bypasses the GATT cache", peer);
        self.lock().uncached_peers.insert(peer.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("C0:FF:EE:00:11:22"), Some(0xC0FF_EE00_1122));
        assert_eq!(parse_address("0xc0ffee001122"), Some(0xC0FF_EE00_1122));
        assert_eq!(parse_address("not an address"), None);
        assert_eq!(parse_address(""), None);
    }

    #[test]
    fn test_guid_round_trip() {
        let guid = to_guid(protocol::SERVICE_UUID);
        assert_eq!(guid.data1, 0x198a8000);
        assert_eq!(to_uuid(guid), protocol::SERVICE_UUID);
    }
}
