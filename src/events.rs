//! Events a session publishes to its consumers

use log::trace;
use tokio::sync::broadcast;

use crate::devices::ProductType;
use crate::oad::FirmwareUpdateStatus;
use crate::status::{AiVisionObject, PortCommandStatus, SensorStatus};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    /// Connected, but commands are refused until a lock code is entered
    Locked,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub product: ProductType,
    pub system_version: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceEvent {
    ConnectionState(ConnectionState),
    DeviceInfo(DeviceInfo),
    PortStatus(Vec<PortCommandStatus>),
    SensorStatus(SensorStatus),
    /// Firmware update progress, 0 to 100
    FirmwareProgress(u8),
    FirmwareStatus(FirmwareUpdateStatus),
    AiVision(Vec<AiVisionObject>),
    /// Raw bytes seen on the admin channel
    AdminData(Vec<u8>),
    /// Raw bytes from the user program's serial channel
    UserData(Vec<u8>),
    /// The device is locked and wants its code entered
    LockCodeRequested,
}

/// Fan-out of a session's events.
///
/// Created with the session and dropped with it. Receivers see the channel close
/// once the session is gone.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<DeviceEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.sender.subscribe()
    }

    /// Publishes to every current subscriber. Having none is not an error.
    pub fn publish(&self, event: DeviceEvent) {
        if self.sender.send(event).is_err() {
            trace!("No event subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(crate::config::EVENT_CAPACITY)
    }
}
