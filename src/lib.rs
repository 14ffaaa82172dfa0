pub mod checks;
pub mod commands;
pub mod config;
pub mod correlator;
pub mod device;
pub mod devices;
pub mod errors;
pub mod events;
pub mod fixed;
pub mod meta;
pub mod oad;
pub mod protocol;
pub mod status;

pub use device::Session;
pub use devices::{BleTransport, CharacteristicId, ProductType};
pub use events::{DeviceEvent, EventBus};
