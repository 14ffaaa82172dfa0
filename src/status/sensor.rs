//! Inertial sensor status

use bitflags::bitflags;

use crate::fixed::{read_i16_le, read_i32_le, read_u16_le, read_u8};

bitflags! {
    pub struct SensorFlags: u8 {
        const CALIBRATING = 0x01;
        const CRASH_DETECTED = 0x02;
        const BATTERY_LOW = 0x04;
        const CHARGING = 0x08;
    }
}

/// IMU readings. Angles are hundredths of a degree, acceleration is milli-g,
/// rates are tenths of a degree per second.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SensorStatus {
    pub flags: SensorFlags,
    pub heading: u16,
    /// Unbounded rotation, keeps counting past a full turn
    pub rotation: i32,
    pub roll: i16,
    pub pitch: i16,
    pub yaw: i16,
    pub acceleration: [i16; 3],
    pub gyro_rate: [i16; 3],
    /// Percent
    pub battery: u8,
}

impl SensorStatus {
    pub const LEN: usize = 26;

    /// `None` when the notification is too short to hold a full record
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < Self::LEN {
            return None;
        }

        let triple = |offset: usize| -> Option<[i16; 3]> {
            Some([
                read_i16_le(data, offset)?,
                read_i16_le(data, offset + 2)?,
                read_i16_le(data, offset + 4)?,
            ])
        };

        Some(SensorStatus {
            flags: SensorFlags::from_bits_truncate(read_u8(data, 0)?),
            heading: read_u16_le(data, 1)?,
            rotation: read_i32_le(data, 3)?,
            roll: read_i16_le(data, 7)?,
            pitch: read_i16_le(data, 9)?,
            yaw: read_i16_le(data, 11)?,
            acceleration: triple(13)?,
            gyro_rate: triple(19)?,
            battery: read_u8(data, 25)?,
        })
    }

    pub fn heading_degrees(&self) -> f64 {
        self.heading as f64 / 100.0
    }

    pub fn rotation_degrees(&self) -> f64 {
        self.rotation as f64 / 100.0
    }
}
