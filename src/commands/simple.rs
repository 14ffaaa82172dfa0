//! Implements a structure for encoding and decoding simple (legacy CDC) commands.

use crate::errors::DecodeError;
use crate::protocol::{cmds, HEADER_COMMAND, HEADER_REPLY, REPLY_ENVELOPE_LEN};

use super::{Cdc2Message, ReplyLength};

/// Which of the two historical reply arrangements a simple command gets back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyForm {
    /// The reply carries the same command byte that was sent
    Echo,
    /// The reply carries the 0x33 ACK command byte and a single status byte
    Ack,
}

impl ReplyForm {
    fn reply_cmd(self, cmd: u8) -> u8 {
        match self {
            ReplyForm::Echo => cmd,
            ReplyForm::Ack => cmds::ACK,
        }
    }
}

/// The structure base of all Simple commands
///
/// # Members
///
/// * `0` - The simple command id of the command to send.
/// * `1` - The payload of the simple command being sent
pub struct Simple<'a>(pub u8, pub &'a [u8]);

impl<'a> Simple<'a> {
    pub fn encode(&self) -> Vec<u8> {
        // Create the simple packet with magic number and command type
        let mut packet = Vec::from(HEADER_COMMAND);
        packet.push(self.0);

        // And just append the payload. Simple packets carry no CRC.
        packet.extend(self.1);

        packet
    }

    /// Frames the command for the correlator. Simple replies are a fixed size.
    pub fn message(&self, form: ReplyForm, reply_payload_len: usize) -> Cdc2Message {
        Cdc2Message::new(
            self.encode(),
            ReplyLength::Exact(REPLY_ENVELOPE_LEN + reply_payload_len),
        )
        .with_token(form.reply_cmd(self.0), None)
    }

    /// Builds the device->host frame for this command. Used by simulators.
    pub fn reply(&self, form: ReplyForm) -> Vec<u8> {
        let mut packet = Vec::from(HEADER_REPLY);
        packet.push(form.reply_cmd(self.0));
        packet.push(self.1.len() as u8);
        packet.extend(self.1);
        packet
    }
}

/// Validates a simple reply and returns its payload
pub fn validate_simple(data: &[u8], cmd: u8, form: ReplyForm) -> Result<Vec<u8>, DecodeError> {
    if data.get(..2) != Some(&HEADER_REPLY[..]) {
        return Err(DecodeError::InvalidHeader);
    }

    let got = *data.get(2).ok_or(DecodeError::PacketLengthError)?;
    let expected = form.reply_cmd(cmd);
    if got != expected {
        return Err(DecodeError::ExpectedCommand(expected, got));
    }

    let length = *data.get(3).ok_or(DecodeError::PacketLengthError)? as usize;
    data.get(REPLY_ENVELOPE_LEN..REPLY_ENVELOPE_LEN + length)
        .map(|p| p.to_vec())
        .ok_or(DecodeError::PacketLengthError)
}
