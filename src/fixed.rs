//! Fixed-width integer helpers.
//!
//! The wire formats expect values to be truncated to the width of their field.
//! These helpers make that truncation explicit instead of relying on `as` casts
//! scattered through the codecs.

/// Truncates to the low 8 bits.
pub fn wrap_u8(value: i64) -> u8 {
    (value & 0xFF) as u8
}

/// Truncates to the low 8 bits and reinterprets them as signed.
pub fn wrap_i8(value: i64) -> i8 {
    wrap_u8(value) as i8
}

pub fn wrap_u16(value: i64) -> u16 {
    (value & 0xFFFF) as u16
}

pub fn wrap_i16(value: i64) -> i16 {
    wrap_u16(value) as i16
}

pub fn wrap_u32(value: i64) -> u32 {
    (value & 0xFFFF_FFFF) as u32
}

pub fn wrap_i32(value: i64) -> i32 {
    wrap_u32(value) as i32
}

/// Sign extends the low `bits` bits of `value`.
pub fn sign_extend(value: u32, bits: u32) -> i32 {
    debug_assert!(bits > 0 && bits <= 32);
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

pub fn read_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

pub fn read_i8(buf: &[u8], offset: usize) -> Option<i8> {
    buf.get(offset).map(|b| *b as i8)
}

pub fn read_u16_le(buf: &[u8], offset: usize) -> Option<u16> {
    let b = buf.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

pub fn read_i16_le(buf: &[u8], offset: usize) -> Option<i16> {
    read_u16_le(buf, offset).map(|v| v as i16)
}

pub fn read_u32_le(buf: &[u8], offset: usize) -> Option<u32> {
    let b = buf.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn read_i32_le(buf: &[u8], offset: usize) -> Option<i32> {
    read_u32_le(buf, offset).map(|v| v as i32)
}

pub fn read_u16_be(buf: &[u8], offset: usize) -> Option<u16> {
    let b = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([b[0], b[1]]))
}

pub fn read_u32_be(buf: &[u8], offset: usize) -> Option<u32> {
    let b = buf.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Reads a null terminated string out of a fixed capacity field.
/// Invalid UTF-8 is replaced rather than rejected.
pub fn read_cstr(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Writes `s` into a null padded field of `capacity` bytes.
/// The last byte is always left as a terminator.
pub fn write_cstr(s: &str, capacity: usize) -> Result<Vec<u8>, crate::errors::DecodeError> {
    if !s.is_ascii() || s.len() >= capacity {
        return Err(crate::errors::DecodeError::InvalidString);
    }
    let mut field = vec![0u8; capacity];
    field[..s.len()].copy_from_slice(s.as_bytes());
    Ok(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_drops_high_bits() {
        assert_eq!(wrap_u8(0x1FF), 0xFF);
        assert_eq!(wrap_u8(256), 0);
        assert_eq!(wrap_u8(-1), 0xFF);
        assert_eq!(wrap_i8(0x80), -128);
        assert_eq!(wrap_u16(0x12345), 0x2345);
        assert_eq!(wrap_i16(0xFFFF), -1);
        assert_eq!(wrap_u32(0x1_0000_0001), 1);
        assert_eq!(wrap_i32(0xFFFF_FFFF), -1);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0xF, 4), -1);
        assert_eq!(sign_extend(0x7, 4), 7);
        assert_eq!(sign_extend(0x80, 8), -128);
        assert_eq!(sign_extend(0x7FFF, 16), 0x7FFF);
    }

    #[test]
    fn readers_respect_bounds() {
        let buf = [0x34, 0x12, 0xFF, 0xFF];
        assert_eq!(read_u16_le(&buf, 0), Some(0x1234));
        assert_eq!(read_u16_be(&buf, 0), Some(0x3412));
        assert_eq!(read_i16_le(&buf, 2), Some(-1));
        assert_eq!(read_u32_le(&buf, 0), Some(0xFFFF1234));
        assert_eq!(read_u32_le(&buf, 1), None);
        assert_eq!(read_u8(&buf, 4), None);
    }

    #[test]
    fn cstr_round_trip_trims_at_null() {
        let field = write_cstr("slot_1.bin", 24).unwrap();
        assert_eq!(field.len(), 24);
        assert_eq!(read_cstr(&field), "slot_1.bin");
        assert!(write_cstr("this name is far too long to fit", 24).is_err());
        assert_eq!(read_cstr(b"abc"), "abc");
    }
}
