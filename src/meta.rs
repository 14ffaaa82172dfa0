//! Contains Structs and Enums that describe files stored on a VEX device and the
//! parameters of a file transfer.
use bitflags::bitflags;

/// The function to be performed during the file transfer
///
/// # Variants
///
/// * [FileTransferOperation::Write] - Specifies that a file is being written to the device
/// * [FileTransferOperation::Read] - Specifies that a file is being read back from the device.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileTransferOperation {
    /// Specifies that a file is being written to the device
    Write = 0x01,
    /// Specifies that a file is being read back from the device.
    Read = 0x02,
}

/// The target memory region of a file transfer
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileTransferTarget {
    Ddr = 0,
    /// The flash filesystem where most program files are stored
    Qspi = 1,
    Cbuf = 2,
    Vbuf = 3,
    Ddrc = 4,
    Ddre = 5,
    Flash = 6,
    Radio = 7,
    /// Firmware region of the main processor
    A1 = 13,
    B1 = 14,
    B2 = 15,
}

impl FileTransferTarget {
    /// Firmware regions need a factory unlock, longer timeouts and a flash
    /// programming poll once the transfer has been committed.
    pub fn is_firmware_region(self) -> bool {
        matches!(self, Self::A1 | Self::B1 | Self::B2)
    }
}

/// The VID (virtual device id) of a file transfer.
///
/// This selects the namespace a file lives in on the device.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileVendor {
    /// User programs
    User,
    /// System files
    Sys,
    /// The python VM
    VexVm,
    /// Images on the AIM
    AimImage,
    /// Sound assets on the AIM
    AimSound,
    /// Firmware for the AIM radio
    AimRadio,
    /// Allows specifying custom VIDs.
    Other(u8),
}

impl FileVendor {
    /// Converts a [u8] to a [FileVendor]
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x01 => Self::User,
            0x0F => Self::Sys,
            0x40 => Self::VexVm,
            0x80 => Self::AimImage,
            0x88 => Self::AimSound,
            0xFC => Self::AimRadio,
            a => Self::Other(a),
        }
    }

    /// Converts a [FileVendor] to a [u8]
    pub fn to_u8(self) -> u8 {
        match self {
            Self::User => 0x01,
            Self::Sys => 0x0F,
            Self::VexVm => 0x40,
            Self::AimImage => 0x80,
            Self::AimSound => 0x88,
            Self::AimRadio => 0xFC,
            Self::Other(a) => a,
        }
    }
}

bitflags! {
    /// Options in a file transfer
    ///
    /// # Members
    /// * [FileTransferOptions::NONE] - Represents that no options are set
    /// * [FileTransferOptions::OVERWRITE] - Bit 1 is set when the file should be overwritten by the current operation.
    /// * [FileTransferOptions::ERASE_ALL] - Erase every file in the namespace
    pub struct FileTransferOptions: u8 {
        const NONE = 0x0;
        const OVERWRITE = 0b1;
        const ERASE_ALL = 0x80;
    }
}

/// The File type of a file, maximum three ascii characters
///
/// # Variants
/// * [FileTransferType::Bin] - Binary files, generally programs
/// * [FileTransferType::Ini] - Ini files for program metadata and configuration
/// * [FileTransferType::Other] - Any other file type, including custom user types
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileTransferType {
    Bin,
    Ini,
    Other([u8; 3]),
}

impl FileTransferType {
    /// Converts the [FileTransferType] to the three ascii characters of its extension
    pub fn to_bytes(self) -> [u8; 3] {
        match self {
            Self::Bin => *b"bin",
            Self::Ini => *b"ini",
            Self::Other(t) => t,
        }
    }

    pub fn from_bytes(v: &[u8; 3]) -> Self {
        match v {
            b"bin" => Self::Bin,
            b"ini" => Self::Ini,
            _ => Self::Other(*v),
        }
    }
}

/// How the contents of a file should be interpreted
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ExtensionType {
    /// Regular unencrypted file.
    #[default]
    Binary,
    /// A file which depends on a VM (python programs)
    Vm,
    EncryptedBinary,
    Other(u8),
}

impl ExtensionType {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => Self::Binary,
            0x61 => Self::Vm,
            0x73 => Self::EncryptedBinary,
            a => Self::Other(a),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            Self::Binary => 0x00,
            Self::Vm => 0x61,
            Self::EncryptedBinary => 0x73,
            Self::Other(a) => a,
        }
    }
}

/// The action to run when the transfer is complete.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum FileExitAction {
    #[default]
    DoNothing = 0,
    RunProgram = 1,
    Halt = 2,
    ShowRunScreen = 3,
}

/// Start or stop a program that is already on the device
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileLoadAction {
    Run = 0,
    Stop = 0x80,
}

/// File metadata returned when listing a directory by index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// The index of the file
    pub idx: u8,
    /// The length of the file
    pub size: u32,
    /// The address the file should be loaded at
    pub load_addr: u32,
    /// The crc32 of the file according to [crate::protocol::VEX_CRC32].
    pub crc: u32,
    pub file_type: FileTransferType,
    pub extension_type: ExtensionType,
    /// Seconds since the year 2000
    pub timestamp: u32,
    /// The version of the file, pack such that 1.2.3.4 == 0x01020304
    pub version: u32,
    pub name: String,
}

impl DirectoryEntry {
    /// The modification time as a unix timestamp
    pub fn unix_timestamp(&self) -> i64 {
        crate::protocol::j2000_to_unix(self.timestamp)
    }
}

/// File metadata returned when requesting file metadata by name
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileInfo {
    /// The VID of the linked file, if there is one
    pub linked_vid: Option<FileVendor>,
    pub size: u32,
    pub load_addr: u32,
    pub crc: u32,
    pub file_type: FileTransferType,
    pub extension_type: ExtensionType,
    /// Seconds since the year 2000
    pub timestamp: u32,
    pub version: u32,
    /// The filename of the linked file
    pub linked_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_round_trips_known_and_custom_ids() {
        for v in [0x01, 0x0F, 0x40, 0x80, 0x88, 0xFC, 0x18] {
            assert_eq!(FileVendor::from_u8(v).to_u8(), v);
        }
        assert_eq!(FileVendor::from_u8(0x88), FileVendor::AimSound);
        assert_eq!(FileVendor::from_u8(0x18), FileVendor::Other(0x18));
    }

    #[test]
    fn firmware_regions() {
        assert!(FileTransferTarget::B1.is_firmware_region());
        assert!(!FileTransferTarget::Qspi.is_firmware_region());
    }

    #[test]
    fn file_type_bytes() {
        assert_eq!(FileTransferType::Bin.to_bytes(), *b"bin");
        assert_eq!(FileTransferType::from_bytes(b"ini"), FileTransferType::Ini);
        assert_eq!(
            FileTransferType::from_bytes(b"png"),
            FileTransferType::Other(*b"png")
        );
    }
}
