//! File transfer and filesystem commands

use crate::checks::ExtPacketChecks;
use crate::errors::DecodeError;
use crate::fixed::{read_cstr, read_u16_le, read_u32_be, read_u32_le, write_cstr};
use crate::meta::{
    DirectoryEntry, ExtensionType, FileExitAction, FileInfo, FileLoadAction,
    FileTransferOperation, FileTransferOptions, FileTransferTarget, FileTransferType, FileVendor,
};
use crate::protocol::{ecmds, Cdc2Ack};

use super::{cdc2_reply_size, validate_extended, Cdc2Message, Command, Extended, ReplyLength};

/// Capacity of a file name field, terminator included
pub const FILE_NAME_LEN: usize = 24;

/// Longest name the device reports in a directory listing
pub const MAX_LISTED_NAME_LEN: usize = 32;

/// Decodes an ACK-only reply
fn decode_ack(data: &[u8], ecmd: u8) -> Result<(), DecodeError> {
    validate_extended(data, ecmd, ExtPacketChecks::ALL)?;
    Ok(())
}

/// Decodes the shared tail of directory and file info replies:
/// size, load address, crc, extension, extension type, timestamp, version and name.
struct FileRecord {
    size: u32,
    load_addr: u32,
    crc: u32,
    file_type: FileTransferType,
    extension_type: ExtensionType,
    timestamp: u32,
    version: u32,
    name: String,
}

impl FileRecord {
    const FIXED_LEN: usize = 24;

    fn decode(p: &[u8]) -> Result<Self, DecodeError> {
        if p.len() < Self::FIXED_LEN {
            return Err(DecodeError::PacketLengthError);
        }
        let name_end = usize::min(p.len(), Self::FIXED_LEN + MAX_LISTED_NAME_LEN);
        Ok(FileRecord {
            size: read_u32_le(p, 0).ok_or(DecodeError::PacketLengthError)?,
            load_addr: read_u32_le(p, 4).ok_or(DecodeError::PacketLengthError)?,
            crc: read_u32_le(p, 8).ok_or(DecodeError::PacketLengthError)?,
            file_type: FileTransferType::from_bytes(&[p[12], p[13], p[14]]),
            extension_type: ExtensionType::from_u8(p[15]),
            timestamp: read_u32_le(p, 16).ok_or(DecodeError::PacketLengthError)?,
            version: read_u32_le(p, 20).ok_or(DecodeError::PacketLengthError)?,
            name: read_cstr(&p[Self::FIXED_LEN..name_end]),
        })
    }
}

/// Initializes a file transfer between the device and host
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInit {
    pub operation: FileTransferOperation,
    pub target: FileTransferTarget,
    pub vid: FileVendor,
    pub options: FileTransferOptions,
    pub length: u32,
    pub addr: u32,
    pub crc: u32,
    pub file_type: FileTransferType,
    pub extension_type: ExtensionType,
    pub timestamp: u32,
    pub version: u32,
    pub name: String,
}

impl FileInit {
    /// Size of the init payload on the wire
    pub const PAYLOAD_LEN: usize = 52;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileInitResponse {
    /// The amount of data (in bytes) that can be sent in every packet.
    pub packet_size: u16,
    /// For reads, the size of the file on the device
    pub file_size: u32,
    /// For reads, the CRC32 of the file on the device
    pub crc: u32,
}

impl Command for FileInit {
    type Response = FileInitResponse;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        // Create the empty payload
        let mut payload = Vec::<u8>::with_capacity(Self::PAYLOAD_LEN);

        // Load the function, target, vid, and options
        payload.extend([
            self.operation as u8,
            self.target as u8,
            self.vid.to_u8(),
            self.options.bits(),
        ]);

        payload.extend(self.length.to_le_bytes());
        payload.extend(self.addr.to_le_bytes());
        payload.extend(self.crc.to_le_bytes());

        // Three character extension, then the extension type in the fourth byte
        payload.extend(self.file_type.to_bytes());
        payload.push(self.extension_type.to_u8());

        payload.extend(self.timestamp.to_le_bytes());
        payload.extend(self.version.to_le_bytes());

        // 23 characters of name and a terminator
        payload.extend(write_cstr(&self.name, FILE_NAME_LEN)?);

        // Accepted inits carry ten bytes of transfer details, refusals only a NACK
        Extended(ecmds::FILE_INIT, &payload).message(ReplyLength::Unknown)
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        let payload = validate_extended(data, ecmds::FILE_INIT, ExtPacketChecks::ALL)?.1;

        Ok(FileInitResponse {
            packet_size: read_u16_le(&payload, 0).ok_or(DecodeError::PacketLengthError)?,
            file_size: read_u32_le(&payload, 2).ok_or(DecodeError::PacketLengthError)?,
            // The file CRC is sent big endian
            crc: read_u32_be(&payload, 6).ok_or(DecodeError::PacketLengthError)?,
        })
    }
}

/// Commits or aborts the current transfer
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileExit(pub FileExitAction);

impl Command for FileExit {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Extended(ecmds::FILE_EXIT, &[self.0 as u8]).message(ReplyLength::Exact(cdc2_reply_size(0)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        decode_ack(data, ecmds::FILE_EXIT)
    }
}

/// Writes a chunk of data at an address of the open file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDataWrite {
    pub address: u32,
    pub data: Vec<u8>,
}

impl Command for FileDataWrite {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        let mut payload = Vec::with_capacity(self.data.len() + 7);
        payload.extend(self.address.to_le_bytes());
        payload.extend(&self.data);

        // Pad the chunk to have a length that is a multiple of four
        payload.resize(4 + ((self.data.len() + 3) & !3), 0x0);

        Extended(ecmds::FILE_WRITE, &payload).message(ReplyLength::Exact(cdc2_reply_size(0)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        decode_ack(data, ecmds::FILE_WRITE)
    }
}

/// Reads a chunk of data from an address of the open file
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileDataRead {
    pub address: u32,
    /// Number of bytes to read, a multiple of four
    pub size: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileDataReadResponse {
    pub address: u32,
    pub data: Vec<u8>,
}

impl Command for FileDataRead {
    type Response = FileDataReadResponse;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        let mut payload = Vec::with_capacity(6);
        payload.extend(self.address.to_le_bytes());
        payload.extend(self.size.to_le_bytes());

        // A NACK reply is much shorter than a data reply, so let the header decide
        Extended(ecmds::FILE_READ, &payload).message(ReplyLength::Unknown)
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        // Successful reads carry no ack byte, only the address and the data
        let payload = validate_extended(
            data,
            ecmds::FILE_READ,
            ExtPacketChecks::CRC | ExtPacketChecks::LENGTH,
        )?
        .1;

        if payload.len() == 1 {
            return Err(DecodeError::Nack(
                Cdc2Ack::from_u8(payload[0]).unwrap_or(Cdc2Ack::Nack),
            ));
        }

        Ok(FileDataReadResponse {
            address: read_u32_le(&payload, 0).ok_or(DecodeError::PacketLengthError)?,
            data: payload[4..].to_vec(),
        })
    }
}

/// Links the open file to another file, such as a program to the VM it runs on
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLink {
    pub vid: FileVendor,
    pub options: FileTransferOptions,
    pub name: String,
}

impl Command for FileLink {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        let mut payload = vec![self.vid.to_u8(), self.options.bits()];
        payload.extend(write_cstr(&self.name, FILE_NAME_LEN)?);
        Extended(ecmds::FILE_LINK, &payload).message(ReplyLength::Exact(cdc2_reply_size(0)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        decode_ack(data, ecmds::FILE_LINK)
    }
}

/// Counts the files in a namespace
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileDirCount {
    pub vid: FileVendor,
    pub options: u8,
}

impl Command for FileDirCount {
    type Response = u16;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Extended(ecmds::FILE_DIR, &[self.vid.to_u8(), self.options]).message(ReplyLength::Unknown)
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        let payload = validate_extended(data, ecmds::FILE_DIR, ExtPacketChecks::ALL)?.1;
        read_u16_le(&payload, 0).ok_or(DecodeError::PacketLengthError)
    }
}

/// Fetches one entry of the directory listing started by [FileDirCount]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileDirEntry {
    pub index: u8,
    pub options: u8,
}

impl Command for FileDirEntry {
    type Response = DirectoryEntry;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        Extended(ecmds::FILE_DIR_ENTRY, &[self.index, self.options])
            .message(ReplyLength::Unknown)
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        let payload = validate_extended(data, ecmds::FILE_DIR_ENTRY, ExtPacketChecks::ALL)?.1;
        let idx = *payload.first().ok_or(DecodeError::PacketLengthError)?;
        let record = FileRecord::decode(&payload[1..])?;

        Ok(DirectoryEntry {
            idx,
            size: record.size,
            load_addr: record.load_addr,
            crc: record.crc,
            file_type: record.file_type,
            extension_type: record.extension_type,
            timestamp: record.timestamp,
            version: record.version,
            name: record.name,
        })
    }
}

/// Runs or stops a program stored on the device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileLoad {
    pub vid: FileVendor,
    pub action: FileLoadAction,
    pub name: String,
}

impl Command for FileLoad {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        let mut payload = vec![self.vid.to_u8(), self.action as u8];
        payload.extend(write_cstr(&self.name, FILE_NAME_LEN)?);
        Extended(ecmds::FILE_LOAD, &payload).message(ReplyLength::Exact(cdc2_reply_size(0)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        decode_ack(data, ecmds::FILE_LOAD)
    }
}

/// Looks up a file's metadata by name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileGetInfo {
    pub vid: FileVendor,
    pub options: u8,
    pub name: String,
}

impl Command for FileGetInfo {
    /// `None` when the file does not exist
    type Response = Option<FileInfo>;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        let mut payload = vec![self.vid.to_u8(), self.options];
        payload.extend(write_cstr(&self.name, FILE_NAME_LEN)?);
        Extended(ecmds::FILE_GET_INFO, &payload).message(ReplyLength::Unknown)
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        let payload = validate_extended(data, ecmds::FILE_GET_INFO, ExtPacketChecks::ALL)?.1;

        let linked_vid = match payload.first() {
            None => return Err(DecodeError::PacketLengthError),
            // 255 is returned if no file was found
            Some(255) => return Ok(None),
            // 0 is returned if there is no linked file
            Some(0) => None,
            Some(v) => Some(FileVendor::from_u8(*v)),
        };

        let record = FileRecord::decode(&payload[1..])?;

        // System files report all bytes as 0xFF
        if record.size == 0xFFFF_FFFF {
            return Ok(None);
        }

        Ok(Some(FileInfo {
            linked_vid,
            size: record.size,
            load_addr: record.load_addr,
            crc: record.crc,
            file_type: record.file_type,
            extension_type: record.extension_type,
            timestamp: record.timestamp,
            version: record.version,
            linked_name: record.name,
        }))
    }
}

/// Updates the metadata of a file already on the device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSetInfo {
    pub vid: FileVendor,
    pub options: FileTransferOptions,
    pub load_addr: u32,
    pub file_type: FileTransferType,
    pub extension_type: ExtensionType,
    pub timestamp: u32,
    pub version: u32,
    pub name: String,
}

impl Command for FileSetInfo {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        let mut payload = vec![self.vid.to_u8(), self.options.bits()];
        payload.extend(self.load_addr.to_le_bytes());
        payload.extend(self.file_type.to_bytes());
        payload.push(self.extension_type.to_u8());
        payload.extend(self.timestamp.to_le_bytes());
        payload.extend(self.version.to_le_bytes());
        payload.extend(write_cstr(&self.name, FILE_NAME_LEN)?);
        Extended(ecmds::FILE_SET_INFO, &payload).message(ReplyLength::Exact(cdc2_reply_size(0)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        decode_ack(data, ecmds::FILE_SET_INFO)
    }
}

/// Erases a file, or the whole namespace with [FileTransferOptions::ERASE_ALL]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileErase {
    pub vid: FileVendor,
    pub options: FileTransferOptions,
    pub name: String,
}

impl Command for FileErase {
    type Response = ();

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        let mut payload = vec![self.vid.to_u8(), self.options.bits()];
        payload.extend(write_cstr(&self.name, FILE_NAME_LEN)?);
        Extended(ecmds::FILE_ERASE, &payload).message(ReplyLength::Exact(cdc2_reply_size(0)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        decode_ack(data, ecmds::FILE_ERASE)
    }
}

/// Asks which program slot a file occupies
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileUserStat {
    pub vid: FileVendor,
    pub options: u8,
    pub name: String,
}

impl Command for FileUserStat {
    type Response = u8;

    fn encode_request(&self) -> Result<Cdc2Message, DecodeError> {
        let mut payload = vec![self.vid.to_u8(), self.options];
        payload.extend(write_cstr(&self.name, FILE_NAME_LEN)?);
        Extended(ecmds::FILE_USER_STAT, &payload).message(ReplyLength::Exact(cdc2_reply_size(1)))
    }

    fn decode_response(&self, data: &[u8]) -> Result<Self::Response, DecodeError> {
        let payload = validate_extended(data, ecmds::FILE_USER_STAT, ExtPacketChecks::ALL)?.1;
        payload.first().copied().ok_or(DecodeError::PacketLengthError)
    }
}
