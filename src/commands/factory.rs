//! Factory commands, needed to write the firmware regions.
//!
//! DANGER: a bad write to these regions can leave a device unbootable.

use crate::checks::ExtPacketChecks;
use crate::errors::DecodeError;
use crate::protocol::ecmds;

use super::{cdc2_reply_size, validate_extended, Cdc2Message, Command, Extended, ReplyLength};

/// Unlocks the firmware regions until the next reboot
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FactoryEnable;

impl FactoryEnable {
    pub const MAGIC: [u8; 4] = [0x4D, 0x4C, 0x4B, 0x4A];
}

impl Command for FactoryEnable {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Extended(ecmds::FACTORY_ENABLE, &Self::MAGIC).message(ReplyLength::Exact(cdc2_reply_size(0)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        validate_extended(data, ecmds::FACTORY_ENABLE, ExtPacketChecks::ALL)?;
        Ok(())
    }
}

/// Polls flash programming progress after a firmware region transfer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FactoryStatus;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FactoryStatusResponse {
    pub status: u8,
    /// 0 to 100, or [FactoryStatusResponse::PERCENT_ERROR]
    pub percent: u8,
}

impl FactoryStatusResponse {
    pub const PERCENT_ERROR: u8 = 255;

    pub fn is_error(&self) -> bool {
        self.percent == Self::PERCENT_ERROR
    }

    pub fn is_complete(&self) -> bool {
        self.percent >= 100 && !self.is_error()
    }
}

impl Command for FactoryStatus {
    type Response = FactoryStatusResponse;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Extended(ecmds::FACTORY_STATUS, &[]).message(ReplyLength::Exact(cdc2_reply_size(2)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        let payload = validate_extended(data, ecmds::FACTORY_STATUS, ExtPacketChecks::ALL)?.1;
        match payload[..] {
            [status, percent, ..] => Ok(FactoryStatusResponse { status, percent }),
            _ => Err(DecodeError::PacketLengthError),
        }
    }
}
