//! Intel-HEX firmware images for over-the-air download

use log::debug;

use crate::errors::ImageError;
use crate::fixed::{read_u16_le, wrap_u16};

/// Flash page size used by the image header CRC
pub const PAGE_SIZE: usize = 0x1000;

/// Offset of the image type byte in the image header
pub const IMG_TYPE_OFFSET: usize = 18;

/// Size of the image identify header
pub const HEADER_LEN: usize = 16;

/// Value of unprogrammed flash, used to fill gaps in the image
pub const ERASED: u8 = 0xFF;

const RECORD_DATA: u8 = 0x00;
const RECORD_EOF: u8 = 0x01;
const RECORD_EXTENDED_LINEAR: u8 = 0x04;

/// A firmware image flattened out of Intel-HEX records
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FirmwareImage {
    pub data: Vec<u8>,
    /// Absolute address of the first data record
    pub base_address: u32,
    /// Image length in 4-byte words
    pub len: u16,
    /// Base address in 4-byte words
    pub addr: u16,
    pub img_type: u8,
    pub crc0: u16,
    /// Shadow CRC, always unset in the file
    pub crc1: u16,
    pub ver: u16,
    pub uid: [u8; 4],
    last_block: bool,
}

/// The TI OAD CRC16 step: shifts one byte through CRC-16/CCITT, MSB first.
fn crc16_step(mut crc: u16, mut byte: u8) -> u16 {
    const POLY: u16 = 0x1021;

    for _ in 0..8 {
        let msb = crc & 0x8000;
        crc <<= 1;
        if byte & 0x80 != 0 {
            crc |= 0x0001;
        }
        if msb != 0 {
            crc ^= POLY;
        }
        byte <<= 1;
    }

    crc
}

/// The image header CRC.
///
/// Walks the image one flash page at a time. The first four bytes of page 0 hold
/// the CRC fields and are skipped. When the walk reaches the end of the image two
/// zero bytes are shifted in and the result returned.
pub fn image_crc16(data: &[u8], len_words: u16) -> u16 {
    const WORDS_PER_PAGE: usize = PAGE_SIZE / 4;

    let len_words = len_words as usize;
    let page_end = len_words / WORDS_PER_PAGE;
    let end_offset = (len_words - page_end * WORDS_PER_PAGE) * 4;
    let byte_at = |i: usize| data.get(i).copied().unwrap_or(ERASED);

    let mut crc = 0u16;
    for page in 0..=page_end {
        let mut offset = 0;
        while offset < PAGE_SIZE {
            if page == 0 && offset == 0 {
                // Skip the CRC fields
                offset = 3;
            } else if page == page_end && offset == end_offset {
                crc = crc16_step(crc, 0);
                crc = crc16_step(crc, 0);
                return crc;
            } else {
                crc = crc16_step(crc, byte_at(page * PAGE_SIZE + offset));
            }
            offset += 1;
        }
    }

    crc
}

/// Decodes the hex digits of one record, after the leading colon
fn decode_record(line: &str, line_no: usize) -> Result<Vec<u8>, ImageError> {
    let malformed = |reason| ImageError::MalformedImage {
        line: line_no,
        reason,
    };

    if line.len() % 2 != 0 {
        return Err(malformed("odd number of hex digits"));
    }

    let bytes = (0..line.len())
        .step_by(2)
        .map(|i| {
            line.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
        })
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| malformed("invalid hex digit"))?;

    // count, address (2), type, data, checksum
    if bytes.len() < 5 || bytes.len() != bytes[0] as usize + 5 {
        return Err(malformed("record length does not match byte count"));
    }

    let sum = bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    if sum != 0 {
        return Err(malformed("bad record checksum"));
    }

    Ok(bytes)
}

impl FirmwareImage {
    /// Parses an Intel-HEX image.
    ///
    /// Lines that do not start with `:` are ignored. Gaps between data records are
    /// filled with `0xFF`.
    pub fn from_hex(hex: &str) -> Result<Self, ImageError> {
        let mut data = Vec::<u8>::new();
        let mut start: Option<u32> = None;
        let mut upper: u32 = 0;

        for (i, line) in hex.lines().enumerate() {
            let line_no = i + 1;
            let Some(record) = line.trim().strip_prefix(':') else {
                continue;
            };

            let bytes = decode_record(record, line_no)?;
            let count = bytes[0] as usize;
            let offset = u16::from_be_bytes([bytes[1], bytes[2]]) as u32;
            let payload = &bytes[4..4 + count];

            match bytes[3] {
                RECORD_DATA => {
                    let address = upper.wrapping_add(offset);
                    let base = *start.get_or_insert(address);
                    if address < base {
                        return Err(ImageError::MalformedImage {
                            line: line_no,
                            reason: "data record below the image base address",
                        });
                    }

                    let at = (address - base) as usize;
                    if at > data.len() {
                        data.resize(at, ERASED);
                    }

                    let end = at + payload.len();
                    if end > data.len() {
                        data.resize(end, ERASED);
                    }
                    data[at..end].copy_from_slice(payload);
                }
                RECORD_EOF => break,
                RECORD_EXTENDED_LINEAR => {
                    if count != 2 {
                        return Err(ImageError::MalformedImage {
                            line: line_no,
                            reason: "extended linear address must be two bytes",
                        });
                    }
                    upper = (u16::from_be_bytes([payload[0], payload[1]]) as u32) << 16;
                }
                _ => {
                    return Err(ImageError::MalformedImage {
                        line: line_no,
                        reason: "unsupported record type",
                    })
                }
            }
        }

        let base_address = start.ok_or(ImageError::Empty)?;
        if data.is_empty() {
            return Err(ImageError::Empty);
        }

        Ok(Self::from_bytes(data, base_address))
    }

    /// Builds an image from an already flattened buffer
    pub fn from_bytes(data: Vec<u8>, base_address: u32) -> Self {
        let byte_at = |i: usize| data.get(i).copied().unwrap_or(ERASED);

        let len = wrap_u16(((data.len() + 3) / 4) as i64);
        let image = FirmwareImage {
            base_address,
            len,
            addr: wrap_u16((base_address / 4) as i64),
            img_type: byte_at(IMG_TYPE_OFFSET),
            crc0: image_crc16(&data, len),
            crc1: 0xFFFF,
            ver: read_u16_le(&data, 4).unwrap_or(0xFFFF),
            uid: [byte_at(8), byte_at(9), byte_at(10), byte_at(11)],
            last_block: false,
            data,
        };

        debug!(
            "Image of {} bytes at {:#x}, type {}, crc {:#06x}",
            image.data.len(),
            image.base_address,
            image.img_type,
            image.crc0
        );

        image
    }

    /// The 16 byte identify header:
    /// `crc0, crc1, ver, len, uid[4], addr, img_type, state`
    pub fn header(&self) -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[0..2].copy_from_slice(&self.crc0.to_le_bytes());
        header[2..4].copy_from_slice(&self.crc1.to_le_bytes());
        header[4..6].copy_from_slice(&self.ver.to_le_bytes());
        header[6..8].copy_from_slice(&self.len.to_le_bytes());
        header[8..12].copy_from_slice(&self.uid);
        header[12..14].copy_from_slice(&self.addr.to_le_bytes());
        header[14] = self.img_type;
        header[15] = ERASED;
        header
    }

    /// Number of blocks needed to send the image with `payload_size` data bytes per block
    pub fn block_count(&self, payload_size: usize) -> u32 {
        if payload_size == 0 {
            return 0;
        }
        ((self.data.len() + payload_size - 1) / payload_size) as u32
    }

    /// Block `n`: its block number (u32 LE) followed by up to `payload_size` bytes of image.
    /// `None` once the image is exhausted.
    pub fn block(&mut self, n: u32, payload_size: usize) -> Option<Vec<u8>> {
        let start = (n as usize).checked_mul(payload_size)?;
        if payload_size == 0 || start >= self.data.len() {
            return None;
        }

        let end = usize::min(start + payload_size, self.data.len());
        self.last_block = end == self.data.len();

        let mut block = Vec::with_capacity(4 + end - start);
        block.extend(n.to_le_bytes());
        block.extend(&self.data[start..end]);
        Some(block)
    }

    /// True when the previous [FirmwareImage::block] call returned the final chunk
    pub fn last_block(&self) -> bool {
        self.last_block
    }
}
