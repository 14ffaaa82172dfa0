//! Key-value store on the device, used for settings like the robot name and team number

use crate::checks::ExtPacketChecks;
use crate::errors::DecodeError;
use crate::fixed::read_cstr;
use crate::protocol::ecmds;

use super::{cdc2_reply_size, validate_extended, Cdc2Message, Command, Extended, ReplyLength};

/// Longest key the device accepts, terminator excluded
pub const MAX_KEY_LEN: usize = 31;

/// Longest value the device accepts, terminator excluded
pub const MAX_VALUE_LEN: usize = 255;

fn push_terminated(payload: &mut Vec<u8>, s: &str, max: usize) -> Result<(), DecodeError> {
    if !s.is_ascii() || s.len() > max || s.bytes().any(|b| b == 0) {
        return Err(DecodeError::InvalidString);
    }
    payload.extend(s.as_bytes());
    payload.push(0);
    Ok(())
}

/// Reads in a key-value entry from the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KvLoad<'a>(pub &'a str);

impl<'a> Command for KvLoad<'a> {
    type Response = String;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        // The payload is just the key, but zero terminated
        let mut payload = Vec::with_capacity(self.0.len() + 1);
        push_terminated(&mut payload, self.0, MAX_KEY_LEN)?;

        Extended(ecmds::SYS_KV_LOAD, &payload).message(ReplyLength::Unknown)
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        // The payload of the packet should just be the value of the kv store
        let payload = validate_extended(data, ecmds::SYS_KV_LOAD, ExtPacketChecks::ALL)?.1;
        Ok(read_cstr(&payload))
    }
}

/// Writes a key-value entry to the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KvSave<'a>(pub &'a str, pub &'a str);

impl<'a> Command for KvSave<'a> {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        let mut payload = Vec::with_capacity(self.0.len() + self.1.len() + 2);
        push_terminated(&mut payload, self.0, MAX_KEY_LEN)?;
        push_terminated(&mut payload, self.1, MAX_VALUE_LEN)?;

        Extended(ecmds::SYS_KV_SAVE, &payload).message(ReplyLength::Exact(cdc2_reply_size(0)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        validate_extended(data, ecmds::SYS_KV_SAVE, ExtPacketChecks::ALL)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_terminates_key_and_value() {
        let msg = KvSave("teamnumber", "123").encode_request().unwrap();
        assert_eq!(msg.payload[6], 15);
        assert_eq!(&msg.payload[7..22], b"teamnumber\0123\0");
        assert_eq!(msg.reply_length, ReplyLength::Exact(8));
    }

    #[test]
    fn load_trims_value() {
        let reply = Extended(ecmds::SYS_KV_LOAD, b"\x76robot\0\0\0").reply().unwrap();
        assert_eq!(KvLoad("robotname").decode_response(&reply).unwrap(), "robot");
        assert_eq!(
            KvLoad("robotname").encode_request().unwrap().reply_length,
            ReplyLength::Unknown
        );
    }

    #[test]
    fn rejects_bad_keys() {
        let long = "k".repeat(MAX_KEY_LEN + 1);
        assert_eq!(
            KvLoad(&long).encode_request(),
            Err(DecodeError::InvalidString)
        );
        assert_eq!(
            KvSave("name", "caf\u{e9}").encode_request(),
            Err(DecodeError::InvalidString)
        );
    }
}
