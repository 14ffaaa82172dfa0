//! Wire-level constants shared by every VEX BLE product: packet magic,
//! command ids, acknowledgement codes and the checksums used to protect them.

use chrono::Utc;
use crc::{Algorithm, Crc};
use thiserror::Error;

/// Vex uses CRC16/XMODEM as the CRC16.
pub const VEX_CRC16: Algorithm<u16> = crc::CRC_16_XMODEM;

/// Vex uses a CRC32 that I found on page
/// 6 of this document:
/// <https://www.matec-conferences.org/articles/matecconf/pdf/2016/11/matecconf_tomsk2016_04001.pdf>
pub const VEX_CRC32: Algorithm<u32> = Algorithm {
    width: 32,
    poly: 0x04C11DB7,
    init: 0x00000000,
    refin: false,
    refout: false,
    xorout: 0x00000000,
    check: 0x89A1897F,
    residue: 0x00000000,
};

/// The single byte checksum used by the radio bootloader
pub const VEX_CRC8: Algorithm<u8> = crc::CRC_8_SMBUS;

const CRC8: Crc<u8> = Crc::<u8>::new(&VEX_CRC8);
const CRC16: Crc<u16> = Crc::<u16>::new(&VEX_CRC16);
const CRC32: Crc<u32> = Crc::<u32>::new(&VEX_CRC32);

pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Magic prefix of every host to device packet
pub const HEADER_COMMAND: [u8; 4] = [0xC9, 0x36, 0xB8, 0x47];

/// Magic prefix of every device to host packet
pub const HEADER_REPLY: [u8; 2] = [0xAA, 0x55];

/// Reply header (2) + command (1) + one length byte
pub const REPLY_ENVELOPE_LEN: usize = 4;

/// Wire sentinel for a reply whose length is only known once its header arrives
pub const REPLY_LENGTH_UNKNOWN: u16 = 0xFFFF;

/// Offset from unix time for timestamp fields.
/// timestamp = (unix time) - J2000_EPOCH
pub const J2000_EPOCH: i64 = 946684800;

pub fn j2000_to_unix(timestamp: u32) -> i64 {
    timestamp as i64 + J2000_EPOCH
}

pub fn unix_to_j2000(unix: i64) -> u32 {
    crate::fixed::wrap_u32(unix - J2000_EPOCH)
}

/// Seconds since Jan 1 2000 UTC
pub fn j2000_now() -> u32 {
    unix_to_j2000(Utc::now().timestamp())
}

/// Simple (legacy CDC) command bytes
pub mod cmds {
    /// Reply-only acknowledgement used by the IQ command set
    pub const ACK: u8 = 0x33;
    pub const QUERY1: u8 = 0x21;
    pub const SYSTEM_VERSION: u8 = 0xA4;
    pub const USER_CDC: u8 = 0x56;
    pub const CTRL_CDC: u8 = 0x58;
    pub const USER_PLAY: u8 = 0x67;
    pub const USER_STOP: u8 = 0x68;
}

/// Extended (CDC2) command bytes
pub mod ecmds {
    pub const FILE_INIT: u8 = 0x11;
    pub const FILE_EXIT: u8 = 0x12;
    pub const FILE_WRITE: u8 = 0x13;
    pub const FILE_READ: u8 = 0x14;
    pub const FILE_LINK: u8 = 0x15;
    pub const FILE_DIR: u8 = 0x16;
    pub const FILE_DIR_ENTRY: u8 = 0x17;
    pub const FILE_LOAD: u8 = 0x18;
    pub const FILE_GET_INFO: u8 = 0x19;
    pub const FILE_SET_INFO: u8 = 0x1A;
    pub const FILE_ERASE: u8 = 0x1B;
    pub const FILE_USER_STAT: u8 = 0x1C;
    pub const SYS_FLAGS: u8 = 0x20;
    pub const SYS_STATUS: u8 = 0x22;
    pub const SYS_KV_LOAD: u8 = 0x2E;
    pub const SYS_KV_SAVE: u8 = 0x2F;

    // DANGER: Use factory commands at own risk
    pub const FACTORY_STATUS: u8 = 0xF1;
    pub const FACTORY_ENABLE: u8 = 0xFF;
}

/// A V5 device can respond with various different acknowledgements.
/// Some, known as NACKs, are errors that the device cannot handle.
/// This list contains all known NACKs as well as ACK.
#[repr(u8)]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cdc2Ack {
    #[error("acknowledged")]
    Ack = 0x76,
    #[error("general NACK")]
    Nack = 0xFF,
    #[error("packet CRC error")]
    NackPacketCrc = 0xCE,
    #[error("payload length error")]
    NackCmdLength = 0xD0,
    #[error("requested transfer size is too large")]
    NackSize = 0xD1,
    #[error("program CRC error")]
    NackCrc = 0xD2,
    #[error("program file error")]
    NackFile = 0xD3,
    #[error("attempted to download an uninitialized file")]
    NackInit = 0xD4,
    #[error("initialization invalid for this function")]
    NackFunc = 0xD5,
    #[error("data not a multiple of 4 bytes")]
    NackAlign = 0xD6,
    #[error("packet address does not match expected")]
    NackAddr = 0xD7,
    #[error("download length does not match expected")]
    NackIncomplete = 0xD8,
    #[error("directory entry does not exist")]
    NackDirIndex = 0xD9,
    #[error("maximum user files, no more room")]
    NackMaxUserFiles = 0xDA,
    #[error("user file exists")]
    NackFileExists = 0xDB,
    #[error("filesystem full")]
    NackFileSysFull = 0xDC,
}

impl Cdc2Ack {
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x76 => Self::Ack,
            0xFF => Self::Nack,
            0xCE => Self::NackPacketCrc,
            0xD0 => Self::NackCmdLength,
            0xD1 => Self::NackSize,
            0xD2 => Self::NackCrc,
            0xD3 => Self::NackFile,
            0xD4 => Self::NackInit,
            0xD5 => Self::NackFunc,
            0xD6 => Self::NackAlign,
            0xD7 => Self::NackAddr,
            0xD8 => Self::NackIncomplete,
            0xD9 => Self::NackDirIndex,
            0xDA => Self::NackMaxUserFiles,
            0xDB => Self::NackFileExists,
            0xDC => Self::NackFileSysFull,
            _ => return None,
        })
    }
}
