//! Decoders for the status notifications a product streams while connected

pub mod port;
pub mod sensor;
pub mod vision;

pub use port::{PortCommandStatus, PortDeviceType, PortStatusDecoder};
pub use sensor::SensorStatus;
pub use vision::{AiVisionDecoder, AiVisionObject};

use log::trace;

use crate::devices::CharacteristicId;
use crate::events::DeviceEvent;

/// Routes notifications to the decoder for their characteristic.
///
/// Malformed notifications are dropped, they are routine on a noisy link.
#[derive(Clone, Debug, Default)]
pub struct StatusDemux {
    ports: PortStatusDecoder,
    vision: AiVisionDecoder,
}

impl StatusDemux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, characteristic: CharacteristicId, data: &[u8]) -> Option<DeviceEvent> {
        match characteristic {
            CharacteristicId::PortStatus => {
                let records = self.ports.decode(data);
                (!records.is_empty()).then_some(DeviceEvent::PortStatus(records))
            }
            CharacteristicId::SensorStatus => {
                let status = SensorStatus::decode(data);
                if status.is_none() {
                    trace!("Dropping sensor status of {} bytes", data.len());
                }
                status.map(DeviceEvent::SensorStatus)
            }
            CharacteristicId::AiVision => self.vision.push(data).map(DeviceEvent::AiVision),
            CharacteristicId::UserRx => Some(DeviceEvent::UserData(data.to_vec())),
            CharacteristicId::AdminRx => Some(DeviceEvent::AdminData(data.to_vec())),
            other => {
                trace!("No decoder for {:?}", other);
                None
            }
        }
    }
}
