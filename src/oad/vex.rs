//! VEX style download: every step is an explicit request on the control
//! characteristic and every reply carries a status byte.

use log::{debug, error, warn};

use super::ti::BLOCK_HEADER_LEN;
use super::{FirmwareImage, FirmwareTransferStrategy, FirmwareUpdateStatus, OadAction};
use crate::devices::CharacteristicId;
use crate::fixed::{read_u16_le, read_u32_le};
use crate::protocol::{crc32, crc8};

pub const CMD_GET_BLOCK_SIZE: u8 = 0x20;
pub const CMD_IDENTIFY: u8 = 0x21;
pub const CMD_BLOCK: u8 = 0x22;
pub const CMD_ENABLE_IMAGE: u8 = 0x23;

/// Length of the identify blob, including its trailing CRC8
pub const IDENTIFY_LEN: usize = 18;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VexOadState {
    BlockSize,
    Identify,
    SendBlock,
    Enable,
    Done,
}

#[derive(Debug)]
pub struct VexOad {
    image: FirmwareImage,
    state: VexOadState,
    block_size: u16,
}

impl VexOad {
    pub fn new(image: FirmwareImage) -> Self {
        VexOad {
            image,
            state: VexOadState::BlockSize,
            block_size: 0,
        }
    }

    pub fn state(&self) -> VexOadState {
        self.state
    }

    /// `len, addr, crc32, img_type, version` followed by a CRC8 of those 17 bytes
    pub fn identify_blob(&self) -> [u8; IDENTIFY_LEN] {
        let mut blob = [0u8; IDENTIFY_LEN];
        blob[0..4].copy_from_slice(&(self.image.data.len() as u32).to_le_bytes());
        blob[4..8].copy_from_slice(&self.image.base_address.to_le_bytes());
        blob[8..12].copy_from_slice(&crc32(&self.image.data).to_le_bytes());
        blob[12] = self.image.img_type;
        blob[13..17].copy_from_slice(&(self.image.ver as u32).to_le_bytes());
        blob[17] = crc8(&blob[..17]);
        blob
    }

    /// Image bytes per block, the negotiated size less the block number
    fn payload_size(&self) -> usize {
        self.block_size as usize - BLOCK_HEADER_LEN
    }

    fn block_write(&mut self, n: u32) -> Result<Vec<OadAction>, FirmwareUpdateStatus> {
        let payload = self.payload_size();
        let block = self.image.block(n, payload).ok_or_else(|| {
            error!("Device asked for block {} past the end of the image", n);
            FirmwareUpdateStatus::CommunicationFailure
        })?;

        let total = self.image.block_count(payload).max(1);
        let percent = (n as u64 * 100 / total as u64).min(99) as u8;
        Ok(vec![
            OadAction::Write(CharacteristicId::OadBlock, block),
            OadAction::Progress(percent),
        ])
    }
}

/// Every reply is `[command, status, ..]` and any nonzero status ends the download
fn check_status(data: &[u8]) -> Result<(), FirmwareUpdateStatus> {
    match data.get(1) {
        Some(0) => Ok(()),
        Some(status) => {
            let status = FirmwareUpdateStatus::from_device_status(*status);
            error!("Device rejected command {:#04x}: {}", data[0], status);
            Err(status)
        }
        None => Err(FirmwareUpdateStatus::CommunicationFailure),
    }
}

impl FirmwareTransferStrategy for VexOad {
    fn notify_characteristic(&self) -> CharacteristicId {
        CharacteristicId::OadControl
    }

    fn start(&mut self) -> Vec<OadAction> {
        self.state = VexOadState::BlockSize;
        vec![OadAction::Write(
            CharacteristicId::OadControl,
            vec![CMD_GET_BLOCK_SIZE],
        )]
    }

    fn on_notification(
        &mut self,
        characteristic: CharacteristicId,
        data: &[u8],
    ) -> Result<Vec<OadAction>, FirmwareUpdateStatus> {
        if characteristic != CharacteristicId::OadControl {
            warn!("Ignoring download notification on {:?}", characteristic);
            return Ok(vec![]);
        }

        let expected = match self.state {
            VexOadState::BlockSize => CMD_GET_BLOCK_SIZE,
            VexOadState::Identify => CMD_IDENTIFY,
            VexOadState::SendBlock => CMD_BLOCK,
            VexOadState::Enable => CMD_ENABLE_IMAGE,
            VexOadState::Done => {
                warn!("Notification after the download finished");
                return Ok(vec![]);
            }
        };

        if data.first() != Some(&expected) {
            error!(
                "Expected a {:#04x} reply in {:?}, got {:02x?}",
                expected, self.state, data
            );
            return Err(FirmwareUpdateStatus::CommunicationFailure);
        }
        check_status(data)?;

        match self.state {
            VexOadState::BlockSize => {
                let size = read_u16_le(data, 2).ok_or(FirmwareUpdateStatus::CommunicationFailure)?;
                if (size as usize) <= BLOCK_HEADER_LEN {
                    error!("Device negotiated an unusable block size of {}", size);
                    return Err(FirmwareUpdateStatus::CommunicationFailure);
                }

                debug!("Block size is {}", size);
                self.block_size = size;
                self.state = VexOadState::Identify;
                Ok(vec![OadAction::Write(
                    CharacteristicId::OadIdentify,
                    self.identify_blob().to_vec(),
                )])
            }
            VexOadState::Identify => {
                debug!("Image accepted, sending blocks");
                self.state = VexOadState::SendBlock;
                self.block_write(0)
            }
            VexOadState::SendBlock => {
                let block = read_u32_le(data, 2).ok_or(FirmwareUpdateStatus::CommunicationFailure)?;
                let remaining =
                    read_u32_le(data, 6).ok_or(FirmwareUpdateStatus::CommunicationFailure)?;

                if remaining == 0 {
                    debug!("All blocks sent, enabling image");
                    self.state = VexOadState::Enable;
                    return Ok(vec![
                        OadAction::Write(CharacteristicId::OadControl, vec![CMD_ENABLE_IMAGE]),
                        OadAction::Progress(100),
                    ]);
                }

                self.block_write(block)
            }
            VexOadState::Enable => {
                self.state = VexOadState::Done;
                Ok(vec![OadAction::Finished(FirmwareUpdateStatus::Success)])
            }
            VexOadState::Done => Ok(vec![]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> FirmwareImage {
        FirmwareImage::from_bytes((0u8..20).collect(), 0x0800_0000)
    }

    fn block_reply(block: u32, remaining: u32) -> Vec<u8> {
        let mut r = vec![CMD_BLOCK, 0];
        r.extend(block.to_le_bytes());
        r.extend(remaining.to_le_bytes());
        r
    }

    #[test]
    fn identify_blob_layout() {
        let oad = VexOad::new(image());
        let blob = oad.identify_blob();

        assert_eq!(&blob[0..4], &20u32.to_le_bytes());
        assert_eq!(&blob[4..8], &0x0800_0000u32.to_le_bytes());
        assert_eq!(&blob[8..12], &crc32(&image().data).to_le_bytes());
        assert_eq!(blob[12], 18);
        assert_eq!(blob[17], crc8(&blob[..17]));
    }

    #[test]
    fn full_download() {
        let mut oad = VexOad::new(image());
        assert_eq!(
            oad.start(),
            vec![OadAction::Write(CharacteristicId::OadControl, vec![0x20])]
        );

        let actions = oad
            .on_notification(CharacteristicId::OadControl, &[0x20, 0, 12, 0])
            .unwrap();
        assert_eq!(oad.state(), VexOadState::Identify);
        assert!(matches!(
            &actions[..],
            [OadAction::Write(CharacteristicId::OadIdentify, blob)] if blob.len() == IDENTIFY_LEN
        ));

        let mut sent: Vec<u8> = Vec::new();
        let mut actions = oad
            .on_notification(CharacteristicId::OadControl, &[0x21, 0])
            .unwrap();
        for (n, remaining) in [(1u32, 2u32), (2, 1), (3, 0)] {
            match &actions[0] {
                OadAction::Write(CharacteristicId::OadBlock, block) => sent.extend(&block[4..]),
                other => panic!("expected a block write, got {other:?}"),
            }
            actions = oad
                .on_notification(CharacteristicId::OadControl, &block_reply(n, remaining))
                .unwrap();
        }

        assert_eq!(sent, image().data);
        assert_eq!(oad.state(), VexOadState::Enable);
        assert_eq!(
            actions,
            vec![
                OadAction::Write(CharacteristicId::OadControl, vec![0x23]),
                OadAction::Progress(100)
            ]
        );

        let actions = oad
            .on_notification(CharacteristicId::OadControl, &[0x23, 0])
            .unwrap();
        assert_eq!(
            actions,
            vec![OadAction::Finished(FirmwareUpdateStatus::Success)]
        );
        assert_eq!(oad.state(), VexOadState::Done);
    }

    #[test]
    fn block_writes_fit_the_negotiated_size() {
        let mut oad = VexOad::new(image());
        oad.start();
        oad.on_notification(CharacteristicId::OadControl, &[0x20, 0, 12, 0])
            .unwrap();
        let actions = oad
            .on_notification(CharacteristicId::OadControl, &[0x21, 0])
            .unwrap();

        let OadAction::Write(CharacteristicId::OadBlock, block) = &actions[0] else {
            panic!("expected a block write, got {:?}", actions[0]);
        };
        assert_eq!(block.len(), 12);
        assert_eq!(&block[..4], &0u32.to_le_bytes());
        assert_eq!(&block[4..], &image().data[..8]);
    }

    #[test]
    fn block_size_without_room_for_data_aborts() {
        for size in [0u8, 4] {
            let mut oad = VexOad::new(image());
            oad.start();
            assert_eq!(
                oad.on_notification(CharacteristicId::OadControl, &[0x20, 0, size, 0]),
                Err(FirmwareUpdateStatus::CommunicationFailure)
            );
        }
    }

    #[test]
    fn nack_during_blocks_aborts() {
        let mut oad = VexOad::new(image());
        oad.start();
        oad.on_notification(CharacteristicId::OadControl, &[0x20, 0, 12, 0])
            .unwrap();
        oad.on_notification(CharacteristicId::OadControl, &[0x21, 0])
            .unwrap();

        let mut nack = block_reply(1, 2);
        nack[1] = 0x02;
        assert_eq!(
            oad.on_notification(CharacteristicId::OadControl, &nack),
            Err(FirmwareUpdateStatus::FlashError)
        );
    }

    #[test]
    fn out_of_order_reply_aborts() {
        let mut oad = VexOad::new(image());
        oad.start();
        assert_eq!(
            oad.on_notification(CharacteristicId::OadControl, &[0x21, 0]),
            Err(FirmwareUpdateStatus::CommunicationFailure)
        );
    }

    #[test]
    fn block_past_the_end_aborts() {
        let mut oad = VexOad::new(image());
        oad.start();
        oad.on_notification(CharacteristicId::OadControl, &[0x20, 0, 12, 0])
            .unwrap();
        oad.on_notification(CharacteristicId::OadControl, &[0x21, 0])
            .unwrap();
        assert_eq!(
            oad.on_notification(CharacteristicId::OadControl, &block_reply(9, 1)),
            Err(FirmwareUpdateStatus::CommunicationFailure)
        );
    }
}
