//! Implements commands that deal directly with the device's system

use crate::checks::ExtPacketChecks;
use crate::errors::DecodeError;
use crate::fixed::read_u32_le;
use crate::protocol::{cmds, ecmds, Cdc2Ack};

use super::{
    validate_extended, validate_simple, Cdc2Message, Command, Extended, ReplyForm, ReplyLength,
    Simple,
};

/// Legacy device query, also used to clear stale transfer state before a file transfer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Query1;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Query1Response {
    pub version_1: u32,
    pub version_2: u32,
    pub boot_source: u8,
    pub count: u8,
}

impl Command for Query1 {
    type Response = Query1Response;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Ok(Simple(cmds::QUERY1, &[]).message(ReplyForm::Echo, 10))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        let v = validate_simple(data, cmds::QUERY1, ReplyForm::Echo)?;
        if v.len() < 10 {
            return Err(DecodeError::PacketLengthError);
        }

        Ok(Query1Response {
            version_1: read_u32_le(&v, 0).ok_or(DecodeError::PacketLengthError)?,
            version_2: read_u32_le(&v, 4).ok_or(DecodeError::PacketLengthError)?,
            boot_source: v[8],
            count: v[9],
        })
    }
}

/// Gets the system version and product id
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemVersion;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemVersionResponse {
    /// major, minor, build, hotfix, beta
    pub system_version: (u8, u8, u8, u8, u8),
    pub product: u8,
    pub flags: u8,
}

impl SystemVersionResponse {
    pub fn version_string(&self) -> String {
        let (major, minor, build, hotfix, beta) = self.system_version;
        if beta == 0 {
            format!("{major}.{minor}.{build}.{hotfix}")
        } else {
            format!("{major}.{minor}.{build}.{hotfix}b{beta}")
        }
    }
}

impl Command for SystemVersion {
    type Response = SystemVersionResponse;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        // Just encode an empty command with id 0xA4
        Ok(Simple(cmds::SYSTEM_VERSION, &[]).message(ReplyForm::Echo, 8))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        // Alias to make code shorter
        let v = validate_simple(data, cmds::SYSTEM_VERSION, ReplyForm::Echo)?;
        if v.len() < 7 {
            return Err(DecodeError::PacketLengthError);
        }

        Ok(SystemVersionResponse {
            system_version: (v[0], v[1], v[2], v[3], v[4]),
            product: v[5],
            flags: v[6],
        })
    }
}

/// Decodes the single status byte of an ACK form reply
fn decode_ack_form(data: &[u8], cmd: u8) -> Result<(), DecodeError> {
    let v = validate_simple(data, cmd, ReplyForm::Ack)?;
    match v.first().copied().map(Cdc2Ack::from_u8) {
        Some(Some(Cdc2Ack::Ack)) => Ok(()),
        Some(Some(nack)) => Err(DecodeError::Nack(nack)),
        Some(None) => Err(DecodeError::Nack(Cdc2Ack::Nack)),
        None => Err(DecodeError::PacketLengthError),
    }
}

/// Starts the program in a slot on devices that use the legacy command set
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UserPlay(pub u8);

impl Command for UserPlay {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Ok(Simple(cmds::USER_PLAY, &[self.0]).message(ReplyForm::Ack, 1))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        decode_ack_form(data, cmds::USER_PLAY)
    }
}

/// Stops the running program on devices that use the legacy command set
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct UserStop;

impl Command for UserStop {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Ok(Simple(cmds::USER_STOP, &[]).message(ReplyForm::Ack, 1))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        decode_ack_form(data, cmds::USER_STOP)
    }
}

/// Reads the system flag word
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemFlags;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemFlagsResponse {
    pub flags: u32,
}

impl Command for SystemFlags {
    type Response = SystemFlagsResponse;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Extended(ecmds::SYS_FLAGS, &[]).message(ReplyLength::Unknown)
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        let payload = validate_extended(data, ecmds::SYS_FLAGS, ExtPacketChecks::ALL)?.1;
        Ok(SystemFlagsResponse {
            flags: read_u32_le(&payload, 0).ok_or(DecodeError::PacketLengthError)?,
        })
    }
}

/// Reads the versions of the system components
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemStatus;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SystemStatusResponse {
    pub system_version: [u8; 4],
    pub cpu0_version: [u8; 4],
    pub cpu1_version: [u8; 4],
    /// Not every product reports a radio version
    pub radio_version: Option<[u8; 4]>,
}

impl Command for SystemStatus {
    type Response = SystemStatusResponse;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Extended(ecmds::SYS_STATUS, &[]).message(ReplyLength::Unknown)
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        let p = validate_extended(data, ecmds::SYS_STATUS, ExtPacketChecks::ALL)?.1;

        // First byte is reserved
        let version = |offset: usize| -> Option<[u8; 4]> { p.get(offset..offset + 4)?.try_into().ok() };

        Ok(SystemStatusResponse {
            system_version: version(1).ok_or(DecodeError::PacketLengthError)?,
            cpu0_version: version(5).ok_or(DecodeError::PacketLengthError)?,
            cpu1_version: version(9).ok_or(DecodeError::PacketLengthError)?,
            radio_version: version(13),
        })
    }
}
