// Module that contains all commands that can be sent over the admin channel

mod extended;
pub use extended::{
    cdc2_reply_size, decode_length, encode_length, validate_extended, Extended, ExtendedResponse,
};

mod simple;
pub use simple::{validate_simple, ReplyForm, Simple};

mod file;
pub use file::*;

mod kv;
pub use kv::{KvLoad, KvSave};

mod system;
pub use system::{
    Query1, Query1Response, SystemFlags, SystemFlagsResponse, SystemStatus, SystemStatusResponse,
    SystemVersion, SystemVersionResponse, UserPlay, UserStop,
};

mod factory;
pub use factory::{FactoryEnable, FactoryStatus, FactoryStatusResponse};

use crate::errors::DecodeError;

/// How many bytes the correlator should wait for before a reply is complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyLength {
    Exact(usize),
    /// Only known once the length field of the reply header has arrived
    Unknown,
}

impl ReplyLength {
    /// Maps the wire convention where 0xFFFF marks an unknown length
    pub fn from_wire(value: u16) -> Self {
        if value == crate::protocol::REPLY_LENGTH_UNKNOWN {
            ReplyLength::Unknown
        } else {
            ReplyLength::Exact(value as usize)
        }
    }
}

/// Identifies which reply a message is waiting for.
/// Used to drop late replies to an earlier request that already timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyToken {
    pub cmd: u8,
    pub ecmd: Option<u8>,
}

/// A fully framed message ready to be written to the admin characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cdc2Message {
    pub payload: Vec<u8>,
    pub reply_length: ReplyLength,
    pub reply_token: Option<ReplyToken>,
}

impl Cdc2Message {
    pub fn new(payload: Vec<u8>, reply_length: ReplyLength) -> Self {
        Cdc2Message {
            payload,
            reply_length,
            reply_token: None,
        }
    }

    pub fn with_token(mut self, cmd: u8, ecmd: Option<u8>) -> Self {
        self.reply_token = Some(ReplyToken { cmd, ecmd });
        self
    }
}

/// A command trait that every command implements
pub trait Command {
    type Response;

    /// Encodes the host->device request
    fn encode_request(&self) -> Result<Cdc2Message, DecodeError>;

    /// Decodes the complete device->host reply, header and CRC included
    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError>;
}
