use crate::checks::ExtPacketChecks;
use crate::errors::DecodeError;
use crate::protocol::{cmds, crc16, Cdc2Ack, HEADER_COMMAND, HEADER_REPLY};

use super::{Cdc2Message, ReplyLength};

/// The largest value the two byte length form can carry
const MAX_LENGTH: usize = 0x7FFF;

/// Encodes a CDC2 length field.
///
/// This appears to be a primitive varint implementation. Lengths up to 127 take one byte,
/// anything larger sets the high bit of the first byte and spills into a second one.
pub fn encode_length(length: usize) -> Result<Vec<u8>, DecodeError> {
    if length <= 0x7F {
        Ok(vec![length as u8])
    } else if length <= MAX_LENGTH {
        Ok(vec![0x80 | (length >> 8) as u8, (length & 0xFF) as u8])
    } else {
        Err(DecodeError::PayloadTooLarge(length))
    }
}

/// Decodes a CDC2 length field, returning the value and how many bytes it used.
/// Returns `None` if the field is not complete yet.
pub fn decode_length(data: &[u8]) -> Option<(u16, usize)> {
    let first = *data.first()?;
    if first & 0x80 == 0x80 {
        let low = *data.get(1)?;
        Some(((((first & 0x7F) as u16) << 8) | low as u16, 2))
    } else {
        Some((first as u16, 1))
    }
}

/// Total size of an ACKed CDC2 reply carrying `data_len` bytes after the ack byte
pub fn cdc2_reply_size(data_len: usize) -> usize {
    // ecmd + ack + data + crc16
    let body = 1 + 1 + data_len + 2;
    let length_bytes = if body > 0x7F { 2 } else { 1 };
    HEADER_REPLY.len() + 1 + length_bytes + body
}

/// The structure base of all Extended commands
/// The first u8 is the extended command ID, the second is the
/// extended command's payload
pub struct Extended<'a>(pub u8, pub &'a [u8]);

impl<'a> Extended<'a> {
    /// Frames the command: magic, 0x56, ecmd, length, payload and a big endian CRC16
    pub fn encode(&self) -> Result<Vec<u8>, DecodeError> {
        let mut packet = Vec::<u8>::with_capacity(self.1.len() + 10);
        packet.extend(HEADER_COMMAND);
        packet.push(cmds::USER_CDC);
        packet.push(self.0);
        packet.extend(encode_length(self.1.len())?);
        packet.extend(self.1);

        // The CRC covers everything from the magic through the end of the payload
        let checksum = crc16(&packet);

        // First the upper byte, then the lower byte (big endian)
        packet.push(((checksum >> 8) & 0xff) as u8);
        packet.push((checksum & 0xff) as u8);

        Ok(packet)
    }

    /// Frames the command into a message for the correlator
    pub fn message(&self, reply_length: ReplyLength) -> Result<Cdc2Message, DecodeError> {
        Ok(Cdc2Message::new(self.encode()?, reply_length).with_token(cmds::USER_CDC, Some(self.0)))
    }

    /// Builds a device->host frame around `body` (everything after the ecmd byte).
    /// Mirrors what the firmware sends, which makes it handy for simulators.
    pub fn reply(&self) -> Result<Vec<u8>, DecodeError> {
        let mut inner = vec![self.0];
        inner.extend(self.1);

        let mut packet = Vec::from(HEADER_REPLY);
        packet.push(cmds::USER_CDC);
        packet.extend(encode_length(inner.len() + 2)?);
        packet.extend(inner);

        let checksum = crc16(&packet);
        packet.push((checksum >> 8) as u8);
        packet.push(checksum as u8);
        Ok(packet)
    }
}

/// The extended command response contains the extended command id, and the response payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedResponse(pub u8, pub Vec<u8>);

/// Validates a complete extended reply and strips its envelope.
///
/// When [ExtPacketChecks::ACK] is set the ack byte is checked and removed from the payload,
/// otherwise it is left in place for the caller to interpret.
pub fn validate_extended(
    data: &[u8],
    ecmd: u8,
    checks: ExtPacketChecks,
) -> Result<ExtendedResponse, DecodeError> {
    if data.get(..2) != Some(&HEADER_REPLY[..]) {
        return Err(DecodeError::InvalidHeader);
    }

    if data.get(2) != Some(&cmds::USER_CDC) {
        return Err(DecodeError::ExpectedExtended);
    }

    let (length, consumed) = decode_length(&data[3..]).ok_or(DecodeError::PacketLengthError)?;
    let body_start = 3 + consumed;
    let end = body_start + length as usize;

    // ecmd and the CRC are the bare minimum
    if (length as usize) < 3 || data.len() < end {
        return Err(DecodeError::PacketLengthError);
    }
    if checks.contains(ExtPacketChecks::LENGTH) && data.len() != end {
        return Err(DecodeError::PacketLengthError);
    }

    if checks.contains(ExtPacketChecks::CRC) {
        let expected = u16::from_be_bytes([data[end - 2], data[end - 1]]);
        if crc16(&data[..end - 2]) != expected {
            return Err(DecodeError::CrcError);
        }
    }

    let body = &data[body_start..end - 2];
    if body[0] != ecmd {
        return Err(DecodeError::ExpectedCommand(ecmd, body[0]));
    }

    if checks.contains(ExtPacketChecks::ACK) {
        let ack = body.get(1).ok_or(DecodeError::PacketLengthError)?;
        match Cdc2Ack::from_u8(*ack) {
            Some(Cdc2Ack::Ack) => {}
            Some(nack) => return Err(DecodeError::Nack(nack)),
            None => return Err(DecodeError::Nack(Cdc2Ack::Nack)),
        }
        Ok(ExtendedResponse(ecmd, body[2..].to_vec()))
    } else {
        Ok(ExtendedResponse(ecmd, body[1..].to_vec()))
    }
}
