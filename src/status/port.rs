//! Per-port command status.
//!
//! A notification carries one or more records back to back:
//! `[port | type << 4] [active command] [length] [payload]`.
//! The payload is read with the fixed layout of the record's type, and the next
//! record follows that layout. A type of zero ends the list early.

use bitflags::bitflags;
use log::trace;

use crate::fixed::{read_i16_le, read_i32_le, read_i8, read_u8};

/// The highest port number a record can address
pub const MAX_PORT: u8 = 4;

const RECORD_HEADER_LEN: usize = 3;

bitflags! {
    /// The flag byte that leads every port record
    pub struct PortFlags: u8 {
        const COMMAND_DONE = 0x01;
        const STALLED = 0x02;
        const OVER_CURRENT = 0x04;
        const OVER_TEMPERATURE = 0x08;
        const REVERSED = 0x10;
        const CONNECTED = 0x80;
    }
}

/// The device-type code in the high nibble of a record's first byte
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortDeviceType {
    Drive = 0x1,
    Motor = 0x2,
    Magnet = 0x3,
    Bumper = 0x4,
    Sound = 0x5,
    Drive123 = 0x6,
    Motor123 = 0x7,
}

impl PortDeviceType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x1 => Self::Drive,
            0x2 => Self::Motor,
            0x3 => Self::Magnet,
            0x4 => Self::Bumper,
            0x5 => Self::Sound,
            0x6 => Self::Drive123,
            0x7 => Self::Motor123,
            _ => return None,
        })
    }

    /// Bytes of payload the record layout needs
    pub fn payload_len(self) -> usize {
        match self {
            Self::Motor => 8,
            Self::Drive => 10,
            Self::Magnet => 2,
            Self::Bumper => 2,
            Self::Sound => 3,
            Self::Drive123 => 6,
            Self::Motor123 => 4,
        }
    }
}

/// Fields every port record carries
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortRecord {
    pub port: u8,
    pub active_command: u8,
    /// Increments (wrapping) with every record seen for this port
    pub update_counter: u8,
    pub flags: PortFlags,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortCommandMotorStatus {
    pub record: PortRecord,
    /// Percent of full speed. A single signed byte on the wire.
    pub velocity: i8,
    /// Single signed byte, in 10 mA steps
    pub current: i8,
    /// Degrees
    pub position: i32,
    /// Degrees celsius
    pub temperature: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortCommandDriveStatus {
    pub record: PortRecord,
    /// mm/s, a full 16 bit field unlike the motor's
    pub velocity: i16,
    /// Tenths of a degree
    pub heading: i16,
    /// mm
    pub distance: i32,
    pub current: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortCommandMagnetStatus {
    pub record: PortRecord,
    pub energized: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortCommandBumperStatus {
    pub record: PortRecord,
    pub pressed: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortCommandSoundStatus {
    pub record: PortRecord,
    pub sound_id: u8,
    pub playing: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortCommandDrive123Status {
    pub record: PortRecord,
    pub distance: i16,
    pub heading: i16,
    pub velocity: i8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortCommandMotor123Status {
    pub record: PortRecord,
    pub velocity: i8,
    pub position: i16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortCommandStatus {
    Motor(PortCommandMotorStatus),
    Drive(PortCommandDriveStatus),
    Magnet(PortCommandMagnetStatus),
    Bumper(PortCommandBumperStatus),
    Sound(PortCommandSoundStatus),
    Drive123(PortCommandDrive123Status),
    Motor123(PortCommandMotor123Status),
}

impl PortCommandStatus {
    pub fn record(&self) -> &PortRecord {
        match self {
            Self::Motor(s) => &s.record,
            Self::Drive(s) => &s.record,
            Self::Magnet(s) => &s.record,
            Self::Bumper(s) => &s.record,
            Self::Sound(s) => &s.record,
            Self::Drive123(s) => &s.record,
            Self::Motor123(s) => &s.record,
        }
    }

    pub fn port(&self) -> u8 {
        self.record().port
    }

    pub fn update_counter(&self) -> u8 {
        self.record().update_counter
    }

    pub fn device_type(&self) -> PortDeviceType {
        match self {
            Self::Motor(_) => PortDeviceType::Motor,
            Self::Drive(_) => PortDeviceType::Drive,
            Self::Magnet(_) => PortDeviceType::Magnet,
            Self::Bumper(_) => PortDeviceType::Bumper,
            Self::Sound(_) => PortDeviceType::Sound,
            Self::Drive123(_) => PortDeviceType::Drive123,
            Self::Motor123(_) => PortDeviceType::Motor123,
        }
    }
}

/// Decodes one payload. `None` if it is shorter than the layout needs.
fn decode_payload(
    device_type: PortDeviceType,
    record: PortRecord,
    p: &[u8],
) -> Option<PortCommandStatus> {
    if p.len() < device_type.payload_len() {
        return None;
    }

    let mut record = record;
    record.flags = PortFlags::from_bits_truncate(p[0]);

    Some(match device_type {
        PortDeviceType::Motor => PortCommandStatus::Motor(PortCommandMotorStatus {
            record,
            velocity: read_i8(p, 1)?,
            current: read_i8(p, 2)?,
            position: read_i32_le(p, 3)?,
            temperature: read_u8(p, 7)?,
        }),
        PortDeviceType::Drive => PortCommandStatus::Drive(PortCommandDriveStatus {
            record,
            velocity: read_i16_le(p, 1)?,
            heading: read_i16_le(p, 3)?,
            distance: read_i32_le(p, 5)?,
            current: read_u8(p, 9)?,
        }),
        PortDeviceType::Magnet => PortCommandStatus::Magnet(PortCommandMagnetStatus {
            record,
            energized: p[1] != 0,
        }),
        PortDeviceType::Bumper => PortCommandStatus::Bumper(PortCommandBumperStatus {
            record,
            pressed: p[1] != 0,
        }),
        PortDeviceType::Sound => PortCommandStatus::Sound(PortCommandSoundStatus {
            record,
            sound_id: p[1],
            playing: p[2] != 0,
        }),
        PortDeviceType::Drive123 => PortCommandStatus::Drive123(PortCommandDrive123Status {
            record,
            distance: read_i16_le(p, 1)?,
            heading: read_i16_le(p, 3)?,
            velocity: read_i8(p, 5)?,
        }),
        PortDeviceType::Motor123 => PortCommandStatus::Motor123(PortCommandMotor123Status {
            record,
            velocity: read_i8(p, 1)?,
            position: read_i16_le(p, 2)?,
        }),
    })
}

/// Stateful decoder for port status notifications.
///
/// Keeps the last record of every port so update counters carry over between notifications.
#[derive(Clone, Debug, Default)]
pub struct PortStatusDecoder {
    previous: [Option<PortCommandStatus>; MAX_PORT as usize + 1],
}

impl PortStatusDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The last record decoded for a port
    pub fn previous(&self, port: u8) -> Option<&PortCommandStatus> {
        self.previous.get(port as usize)?.as_ref()
    }

    /// Replaces the stored record for its port
    pub fn seed(&mut self, status: PortCommandStatus) {
        if let Some(slot) = self.previous.get_mut(status.port() as usize) {
            *slot = Some(status);
        }
    }

    /// Decodes every record in a notification.
    ///
    /// A record whose declared length runs past the end of the buffer, or is shorter
    /// than its type's layout, rejects the whole notification. Nothing is emitted or
    /// remembered for it.
    pub fn decode(&mut self, data: &[u8]) -> Vec<PortCommandStatus> {
        let mut counters: [Option<u8>; MAX_PORT as usize + 1] =
            self.previous.map(|p| p.map(|s| s.update_counter()));
        let mut records = Vec::new();
        let mut cursor = 0;

        while let Some(&head) = data.get(cursor) {
            let port = head & 0x0F;
            let code = head >> 4;

            // No more records
            if code == 0 {
                break;
            }
            if port > MAX_PORT {
                trace!("Port status names port {}, stopping", port);
                break;
            }

            let (Some(&active_command), Some(&length)) = (data.get(cursor + 1), data.get(cursor + 2))
            else {
                trace!("Port status record header truncated at {}", cursor);
                return Vec::new();
            };

            let start = cursor + RECORD_HEADER_LEN;
            let Some(payload) = data.get(start..start + length as usize) else {
                trace!(
                    "Port status record declares {} bytes, only {} remain",
                    length,
                    data.len() - start.min(data.len())
                );
                return Vec::new();
            };

            let Some(device_type) = PortDeviceType::from_code(code) else {
                trace!("Unknown port device type {:#x}, stopping", code);
                break;
            };

            let update_counter = match counters[port as usize] {
                Some(previous) => previous.wrapping_add(1),
                None => 0,
            };

            let record = PortRecord {
                port,
                active_command,
                update_counter,
                flags: PortFlags::empty(),
            };

            let Some(status) = decode_payload(device_type, record, payload) else {
                trace!(
                    "{:?} record on port {} is {} bytes, needs {}",
                    device_type,
                    port,
                    length,
                    device_type.payload_len()
                );
                return Vec::new();
            };

            counters[port as usize] = Some(update_counter);
            records.push(status);
            // The next record starts where this type's layout ends
            cursor = start + device_type.payload_len();
        }

        for status in &records {
            self.seed(*status);
        }
        records
    }
}
