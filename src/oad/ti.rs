//! TI style download: the block size comes back from a control command, after which
//! the device pulls blocks by number until it reports the download complete.

use log::{debug, error, warn};

use super::{FirmwareImage, FirmwareTransferStrategy, FirmwareUpdateStatus, OadAction};
use crate::devices::CharacteristicId;
use crate::fixed::{read_u16_le, read_u32_le};

/// Control command: request the block size
pub const CMD_GET_BLOCK_SIZE: u8 = 0x01;
/// Control command: the image is complete, enable it
pub const CMD_ENABLE_IMAGE: u8 = 0x04;
/// Control notification: status and the next block the device wants
pub const RSP_BLOCK_REQUEST: u8 = 0x12;

const STATUS_SUCCESS: u8 = 0x00;
const STATUS_DOWNLOAD_COMPLETE: u8 = 0x0E;

/// Block number header in front of each block's data
pub const BLOCK_HEADER_LEN: usize = 4;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DownloadState {
    PaySize,
    ImgVerify,
    SendBlock,
    Done,
}

#[derive(Debug)]
pub struct TiOad {
    image: FirmwareImage,
    state: DownloadState,
    block_size: u16,
    last_status: u8,
    next_block: u32,
    enabling: bool,
}

impl TiOad {
    pub fn new(image: FirmwareImage) -> Self {
        TiOad {
            image,
            state: DownloadState::PaySize,
            block_size: 0,
            last_status: STATUS_SUCCESS,
            next_block: 0,
            enabling: false,
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn block_size(&self) -> u16 {
        self.block_size
    }

    fn payload_size(&self) -> usize {
        self.block_size as usize - BLOCK_HEADER_LEN
    }

    /// The identify write: the image header, the block size and the number of blocks
    pub fn identify_payload(&self) -> Vec<u8> {
        let mut payload = self.image.header().to_vec();
        payload.extend(self.block_size.to_le_bytes());
        payload.extend(self.image.block_count(self.payload_size()).to_le_bytes());
        payload
    }

    fn enable(&mut self) -> Vec<OadAction> {
        debug!("All blocks sent, enabling image");
        self.enabling = true;
        vec![
            OadAction::Write(CharacteristicId::OadControl, vec![CMD_ENABLE_IMAGE]),
            OadAction::Progress(100),
        ]
    }

    fn send_block(&mut self) -> Result<Vec<OadAction>, FirmwareUpdateStatus> {
        match self.last_status {
            STATUS_SUCCESS => {}
            STATUS_DOWNLOAD_COMPLETE => return Ok(self.enable()),
            status => {
                error!(
                    "Device reported {:?} for block {}",
                    FirmwareUpdateStatus::from_device_status(status),
                    self.next_block
                );
                return Err(FirmwareUpdateStatus::CommunicationFailure);
            }
        }

        let payload_size = self.payload_size();
        match self.image.block(self.next_block, payload_size) {
            Some(block) => {
                let total = self.image.block_count(payload_size).max(1);
                let percent = (self.next_block as u64 * 100 / total as u64).min(99) as u8;
                Ok(vec![
                    OadAction::Write(CharacteristicId::OadBlock, block),
                    OadAction::Progress(percent),
                ])
            }
            None => Ok(self.enable()),
        }
    }
}

impl FirmwareTransferStrategy for TiOad {
    fn notify_characteristic(&self) -> CharacteristicId {
        CharacteristicId::OadControl
    }

    fn start(&mut self) -> Vec<OadAction> {
        self.state = DownloadState::PaySize;
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

        match (self.state, data) {
            (DownloadState::PaySize, [CMD_GET_BLOCK_SIZE, ..]) => {
                let block_size =
                    read_u16_le(data, 1).ok_or(FirmwareUpdateStatus::CommunicationFailure)?;
                if (block_size as usize) <= BLOCK_HEADER_LEN {
                    error!("Device negotiated an unusable block size of {}", block_size);
                    return Err(FirmwareUpdateStatus::CommunicationFailure);
                }

                debug!("Block size is {}", block_size);
                self.block_size = block_size;
                self.state = DownloadState::ImgVerify;
                Ok(vec![OadAction::Write(
                    CharacteristicId::OadIdentify,
                    self.identify_payload(),
                )])
            }
            (DownloadState::ImgVerify | DownloadState::SendBlock, [RSP_BLOCK_REQUEST, ..])
                if !self.enabling =>
            {
                self.last_status = *data.get(1).ok_or(FirmwareUpdateStatus::CommunicationFailure)?;
                self.next_block =
                    read_u32_le(data, 2).ok_or(FirmwareUpdateStatus::CommunicationFailure)?;
                self.state = DownloadState::SendBlock;
                self.send_block()
            }
            (DownloadState::SendBlock, [CMD_ENABLE_IMAGE, status, ..]) if self.enabling => {
                if *status == STATUS_SUCCESS {
                    self.state = DownloadState::Done;
                    Ok(vec![OadAction::Finished(FirmwareUpdateStatus::Success)])
                } else {
                    error!(
                        "Device refused to enable the image: {}",
                        FirmwareUpdateStatus::from_device_status(*status)
                    );
                    Err(FirmwareUpdateStatus::CommunicationFailure)
                }
            }
            _ => {
                error!(
                    "Unexpected download notification {:02x?} in {:?}",
                    data, self.state
                );
                Err(FirmwareUpdateStatus::CommunicationFailure)
            }
        }
    }
}
