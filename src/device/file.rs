use crate::commands::FileInit;
use crate::meta::{
    ExtensionType, FileExitAction, FileTransferOperation, FileTransferOptions,
    FileTransferTarget, FileTransferType, FileVendor,
};

/// The default load address of user programs
pub const DEFAULT_LOAD_ADDRESS: u32 = 0x3800000;

/// File metadata when initiating a transfer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInitOptions {
    pub target: FileTransferTarget,
    pub vid: FileVendor,
    pub options: FileTransferOptions,
    pub addr: u32,
    pub file_type: FileTransferType,
    pub extension_type: ExtensionType,
    /// Seconds since the year 2000
    pub timestamp: u32,
    pub version: u32,
    /// Binds the file to another one, such as a program to its VM
    pub linked_file: Option<(FileVendor, String)>,
    /// What the device does once the transfer is committed
    pub exit_action: FileExitAction,
}

impl Default for FileInitOptions {
    fn default() -> Self {
        FileInitOptions {
            target: FileTransferTarget::Qspi,
            vid: FileVendor::User,
            options: FileTransferOptions::OVERWRITE,
            addr: DEFAULT_LOAD_ADDRESS,
            file_type: FileTransferType::Bin,
            extension_type: ExtensionType::Binary,
            // Default timestamp to number of seconds after Jan 1 2000
            timestamp: crate::protocol::j2000_now(),
            version: 0,
            linked_file: None,
            exit_action: FileExitAction::DoNothing,
        }
    }
}

impl FileInitOptions {
    /// The init command for this file
    pub fn init(
        &self,
        operation: FileTransferOperation,
        name: &str,
        length: u32,
        crc: u32,
    ) -> FileInit {
        FileInit {
            operation,
            target: self.target,
            vid: self.vid,
            options: self.options,
            length,
            addr: self.addr,
            crc,
            file_type: self.file_type,
            extension_type: self.extension_type,
            timestamp: self.timestamp,
            version: self.version,
            name: name.to_string(),
        }
    }
}

/// Where to read a file from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReadOptions {
    pub target: FileTransferTarget,
    pub vid: FileVendor,
    pub addr: u32,
    pub file_type: FileTransferType,
    /// Read exactly this many bytes instead of the stored file size.
    /// Used for raw memory regions, which have no stored length or CRC.
    pub length: Option<u32>,
}

impl Default for FileReadOptions {
    fn default() -> Self {
        FileReadOptions {
            target: FileTransferTarget::Qspi,
            vid: FileVendor::User,
            addr: DEFAULT_LOAD_ADDRESS,
            file_type: FileTransferType::Bin,
            length: None,
        }
    }
}

impl FileReadOptions {
    pub fn init(&self, name: &str) -> FileInit {
        FileInit {
            operation: FileTransferOperation::Read,
            target: self.target,
            vid: self.vid,
            options: FileTransferOptions::NONE,
            length: self.length.unwrap_or(0),
            addr: self.addr,
            crc: 0,
            file_type: self.file_type,
            extension_type: ExtensionType::Binary,
            timestamp: 0,
            version: 0,
            name: name.to_string(),
        }
    }
}
