//! AI vision detections.
//!
//! Each notification starts with a header byte (bit 7 set on the last packet of a
//! frame) and an object count, followed by that many 18 byte object records. A frame
//! can span several notifications; objects are only reported once it is complete.

use log::trace;

use crate::fixed::{read_i16_le, read_u16_le};

pub const OBJECT_LEN: usize = 18;

/// Most objects one frame may hold. Larger frames are dropped.
pub const MAX_FRAME_OBJECTS: usize = 64;

const LAST_PACKET: u8 = 0x80;
const PACKET_HEADER_LEN: usize = 2;

/// Axis aligned detection box, in camera pixels
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    /// Center of the box
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    /// Degrees
    pub angle: u16,
    /// Confidence, 0 to 100
    pub score: u16,
}

impl BoundingBox {
    fn decode(body: &[u8]) -> Option<Self> {
        Some(BoundingBox {
            x: read_u16_le(body, 0)?,
            y: read_u16_le(body, 2)?,
            width: read_u16_le(body, 4)?,
            height: read_u16_le(body, 6)?,
            angle: read_u16_le(body, 8)?,
            score: read_u16_le(body, 10)?,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AiVisionObject {
    /// A trained color signature
    Color { id: u8, bounds: BoundingBox },
    /// A color code made from several signatures
    Code { id: u8, bounds: BoundingBox },
    /// A game element or classroom object found by the model
    Object { id: u8, bounds: BoundingBox },
    /// An AprilTag, as its four corners
    Tag { id: u8, corners: [(i16, i16); 4] },
}

impl AiVisionObject {
    /// Decodes one 18 byte record: type, id and a 16 byte body
    pub fn decode(record: &[u8]) -> Option<Self> {
        let (&kind, rest) = record.split_first()?;
        let (&id, body) = rest.split_first()?;
        if body.len() < OBJECT_LEN - 2 {
            return None;
        }

        match kind {
            0 => Some(Self::Color {
                id,
                bounds: BoundingBox::decode(body)?,
            }),
            1 => Some(Self::Code {
                id,
                bounds: BoundingBox::decode(body)?,
            }),
            2 => Some(Self::Object {
                id,
                bounds: BoundingBox::decode(body)?,
            }),
            3 => {
                let corner = |i: usize| -> Option<(i16, i16)> {
                    Some((read_i16_le(body, i * 4)?, read_i16_le(body, i * 4 + 2)?))
                };
                Some(Self::Tag {
                    id,
                    corners: [corner(0)?, corner(1)?, corner(2)?, corner(3)?],
                })
            }
            _ => None,
        }
    }

    pub fn id(&self) -> u8 {
        match self {
            Self::Color { id, .. }
            | Self::Code { id, .. }
            | Self::Object { id, .. }
            | Self::Tag { id, .. } => *id,
        }
    }
}

/// Reassembles detection frames that span several notifications
#[derive(Clone, Debug, Default)]
pub struct AiVisionDecoder {
    pending: Vec<u8>,
}

impl AiVisionDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one notification. Returns the objects of the frame once its last packet arrives.
    pub fn push(&mut self, data: &[u8]) -> Option<Vec<AiVisionObject>> {
        let (&header, rest) = data.split_first()?;
        let (&count, objects) = rest.split_first()?;

        let Some(objects) = objects.get(..count as usize * OBJECT_LEN) else {
            trace!(
                "Vision packet claims {} objects but holds {} bytes, dropping frame",
                count,
                objects.len()
            );
            self.pending.clear();
            return None;
        };
        if self.pending.len() + objects.len() > MAX_FRAME_OBJECTS * OBJECT_LEN {
            trace!("Vision frame exceeds {} objects, dropping it", MAX_FRAME_OBJECTS);
            self.pending.clear();
            return None;
        }
        self.pending.extend(objects);

        if header & LAST_PACKET == 0 {
            return None;
        }

        let frame = std::mem::take(&mut self.pending);
        Some(
            frame
                .chunks_exact(OBJECT_LEN)
                .filter_map(|record| {
                    let object = AiVisionObject::decode(record);
                    if object.is_none() {
                        trace!("Skipping vision object of type {}", record[0]);
                    }
                    object
                })
                .collect(),
        )
    }

    /// Bytes of a partial frame waiting for more packets
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
