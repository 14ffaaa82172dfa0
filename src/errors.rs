use thiserror::Error;

use crate::protocol::Cdc2Ack;

/// Errors raised while decoding a frame or one of its fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Packet header did not match the expected magic")]
    InvalidHeader,
    #[error("Packet CRC did not match")]
    CrcError,
    #[error("Packet was too short")]
    PacketLengthError,
    #[error("Expected an extended packet")]
    ExpectedExtended,
    #[error("Expected a response to command {0:#04x}, got {1:#04x}")]
    ExpectedCommand(u8, u8),
    #[error("Device replied with NACK: {0}")]
    Nack(Cdc2Ack),
    #[error("Payload of {0} bytes is too large for a single packet")]
    PayloadTooLarge(usize),
    #[error("String is not valid ASCII or is too long")]
    InvalidString,
}

/// Failures of the underlying GATT primitives.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("GATT operation failed: {0}")]
    Gatt(String),
    #[error("Bluetooth error")]
    Bluetooth(#[from] bluest::Error),
    #[error("Not connected to a device")]
    NotConnected,
    #[error("Characteristic {0:?} is not available on this device")]
    UnknownCharacteristic(crate::devices::CharacteristicId),
}

/// Outcome of a failed write-then-await exchange.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("Timed out waiting for a reply")]
    Timeout,
    #[error("Transport error")]
    Transport(#[from] TransportError),
    #[error("Could not decode reply")]
    Decode(DecodeError),
}

impl RequestError {
    /// Only silence is safe to retry. A GATT fault may mean the command already ran.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RequestError::Timeout)
    }

    /// Returns the NACK reason if the device explicitly rejected the command
    pub fn nack(&self) -> Option<Cdc2Ack> {
        match self {
            RequestError::Decode(DecodeError::Nack(ack)) => Some(*ack),
            _ => None,
        }
    }
}

impl From<DecodeError> for RequestError {
    fn from(e: DecodeError) -> Self {
        RequestError::Decode(e)
    }
}

/// Errors raised while parsing an Intel-HEX firmware image
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("Malformed image at line {line}: {reason}")]
    MalformedImage { line: usize, reason: &'static str },
    #[error("Image contains no data records")]
    Empty,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device is not a supported VEX product")]
    InvalidDevice,
    #[error("Device returned an invalid lock magic")]
    InvalidMagic,
    #[error("No bluetooth adapter was found")]
    NoBluetoothAdapter,
    #[error("Device is locked, a lock code is required")]
    Locked,
    #[error("Operation is not supported by this product")]
    Unsupported,
    #[error("File transfer CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
    #[error("Factory status reported an error")]
    FlashFailed,
    #[error("Request error")]
    Request(#[from] RequestError),
    #[error("Transport error")]
    Transport(#[from] TransportError),
    #[error("Decode error")]
    Decode(#[from] DecodeError),
    #[error("Image error")]
    Image(#[from] ImageError),
    #[error("Bluetooth error")]
    Bluetooth(#[from] bluest::Error),
}
