//! Over-the-air firmware download.
//!
//! Both download protocols are written as pure state machines behind
//! [FirmwareTransferStrategy]: they take notifications in and hand back the writes to
//! make. [run_download] drives one over a [BleTransport].

use std::time::Duration;

use log::{debug, error, info};
use thiserror::Error;

use crate::devices::{BleTransport, CharacteristicId, OadTarget};

pub mod image;
pub mod ti;
pub mod vex;

pub use image::FirmwareImage;
pub use ti::{DownloadState, TiOad};
pub use vex::{VexOad, VexOadState};

/// Named outcome of a firmware update
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FirmwareUpdateStatus {
    #[error("firmware update succeeded")]
    Success,
    #[error("image CRC check failed")]
    CrcError,
    #[error("flash write failed")]
    FlashError,
    #[error("device buffer overflow")]
    BufferOverflow,
    #[error("a download is already in progress")]
    AlreadyStarted,
    #[error("download was not started")]
    NotStarted,
    #[error("download is incomplete")]
    DownloadIncomplete,
    #[error("device is out of resources")]
    NoResources,
    #[error("image is too big")]
    ImageTooBig,
    #[error("image is not compatible with this device")]
    IncompatibleImage,
    #[error("image file is invalid")]
    InvalidFile,
    #[error("image file was not found")]
    FileNotFound,
    #[error("image authentication failed")]
    AuthFailure,
    #[error("device stopped responding")]
    Timeout,
    #[error("communication with the device failed")]
    CommunicationFailure,
}

impl FirmwareUpdateStatus {
    /// Maps a status byte reported by the device
    pub fn from_device_status(status: u8) -> Self {
        match status {
            0x00 => Self::Success,
            0x01 => Self::CrcError,
            0x02 => Self::FlashError,
            0x03 => Self::BufferOverflow,
            0x04 => Self::AlreadyStarted,
            0x05 => Self::NotStarted,
            0x06 => Self::DownloadIncomplete,
            0x07 => Self::NoResources,
            0x08 => Self::ImageTooBig,
            0x09 | 0x0B => Self::IncompatibleImage,
            0x0A => Self::InvalidFile,
            0x0C => Self::AuthFailure,
            0x10 => Self::Timeout,
            _ => Self::CommunicationFailure,
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Something a download state machine wants done
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OadAction {
    Write(CharacteristicId, Vec<u8>),
    Progress(u8),
    /// The download is over
    Finished(FirmwareUpdateStatus),
}

/// One firmware download protocol.
///
/// Exactly one write is in flight per state, and a transition only happens on a
/// notification that matches the current state.
pub trait FirmwareTransferStrategy {
    /// The characteristic the device answers on
    fn notify_characteristic(&self) -> CharacteristicId;

    /// The writes that open the download
    fn start(&mut self) -> Vec<OadAction>;

    /// Advances the state machine. An `Err` aborts the download.
    fn on_notification(
        &mut self,
        characteristic: CharacteristicId,
        data: &[u8],
    ) -> Result<Vec<OadAction>, FirmwareUpdateStatus>;
}

/// Picks the strategy a product's download protocol needs
pub fn strategy_for(
    target: OadTarget,
    image: FirmwareImage,
) -> Box<dyn FirmwareTransferStrategy + Send> {
    match target {
        OadTarget::Ti => Box::new(TiOad::new(image)),
        OadTarget::Vex => Box::new(VexOad::new(image)),
    }
}

/// Runs a download to completion.
///
/// `timeout` bounds the wait for each notification. There is no resume: any failure
/// ends the download and is reported as a named status.
pub async fn run_download<T, S>(
    transport: &T,
    strategy: &mut S,
    timeout: Duration,
    mut progress: impl FnMut(u8),
) -> FirmwareUpdateStatus
where
    T: BleTransport,
    S: FirmwareTransferStrategy + ?Sized,
{
    let characteristic = strategy.notify_characteristic();
    let mut subscription = match transport.subscribe(characteristic).await {
        Ok(s) => s,
        Err(e) => {
            error!("Could not listen for download replies: {}", e);
            return FirmwareUpdateStatus::CommunicationFailure;
        }
    };

    let mut actions = strategy.start();
    loop {
        for action in actions {
            match action {
                OadAction::Write(target, data) => {
                    if let Err(e) = transport.write(target, &data).await {
                        error!("Write to {:?} failed: {}", target, e);
                        return FirmwareUpdateStatus::CommunicationFailure;
                    }
                }
                OadAction::Progress(percent) => progress(percent),
                OadAction::Finished(status) => {
                    info!("Firmware download finished: {}", status);
                    return status;
                }
            }
        }

        let data = match tokio::time::timeout(timeout, subscription.recv()).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                error!("Device stopped sending download replies");
                return FirmwareUpdateStatus::CommunicationFailure;
            }
            Err(_) => {
                error!("Timed out waiting for a download reply");
                return FirmwareUpdateStatus::Timeout;
            }
        };

        actions = match strategy.on_notification(characteristic, &data) {
            Ok(actions) => actions,
            Err(status) => {
                error!("Firmware download aborted: {}", status);
                return status;
            }
        };
        debug!("{} download actions queued", actions.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_status_names() {
        assert_eq!(
            FirmwareUpdateStatus::from_device_status(0),
            FirmwareUpdateStatus::Success
        );
        assert_eq!(
            FirmwareUpdateStatus::from_device_status(1),
            FirmwareUpdateStatus::CrcError
        );
        assert_eq!(
            FirmwareUpdateStatus::from_device_status(0x0E),
            FirmwareUpdateStatus::CommunicationFailure
        );
        assert_eq!(
            FirmwareUpdateStatus::FlashError.to_string(),
            "flash write failed"
        );
    }
}
