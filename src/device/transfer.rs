//! Moving files to and from the device's storage

use log::{debug, info, warn};

use super::{FileInitOptions, FileReadOptions, Session};
use crate::commands::{
    FactoryEnable, FactoryStatus, FileDataRead, FileDataWrite, FileExit, FileLink, Query1,
};
use crate::config::chunk_size;
use crate::devices::BleTransport;
use crate::errors::{DecodeError, DeviceError, RequestError};
use crate::meta::{FileExitAction, FileTransferOperation};
use crate::protocol::crc32;

/// CRC the device reports for regions that have no stored checksum
pub const NO_CRC: u32 = 0xFFFFFFFF;

/// Progress of `done` out of `total`, mapped onto `from..to`
fn scaled(done: usize, total: usize, from: u8, to: u8) -> u8 {
    if total == 0 {
        return to;
    }
    let span = (to - from) as usize;
    from + (done.min(total) * span / total) as u8
}

impl<T: BleTransport> Session<T> {
    /// Writes `data` to a file on the device.
    ///
    /// Firmware regions are unlocked first, and after the transfer is committed the
    /// flash programming is polled until it finishes. Their progress is split between
    /// the transfer (0 to 50) and the programming (50 to 100).
    pub async fn save_file(
        &self,
        name: &str,
        data: &[u8],
        options: &FileInitOptions,
        mut progress: impl FnMut(u8),
    ) -> Result<(), DeviceError> {
        self.ready(true)?;
        let _guard = self.lock.lock().await;

        let firmware = options.target.is_firmware_region();
        let timeout = if firmware {
            self.config.flash_timeout
        } else {
            self.config.command_timeout
        };
        let write_end = if firmware { 50 } else { 100 };

        // Clears whatever transfer the device may still have open
        self.exec(&Query1, self.config.command_timeout).await?;

        if firmware {
            info!("Unlocking firmware region {:?}", options.target);
            self.exec(&FactoryEnable, timeout).await?;
        }

        let init = options.init(
            FileTransferOperation::Write,
            name,
            data.len() as u32,
            crc32(data),
        );
        let transfer = self.exec(&init, timeout).await?;
        let chunk = chunk_size(transfer.packet_size, self.config.max_write_chunk);
        debug!(
            "Writing {} bytes of {} in chunks of {}",
            data.len(),
            name,
            chunk
        );

        let mut address = options.addr;
        let mut written = 0;
        for piece in data.chunks(chunk) {
            let write = FileDataWrite {
                address,
                data: piece.to_vec(),
            };
            self.exec(&write, timeout).await?;

            address = address.wrapping_add(piece.len() as u32);
            written += piece.len();
            debug!("Wrote {}/{} bytes", written, data.len());
            progress(scaled(written, data.len(), 0, write_end));
        }

        if let Some((vid, link)) = &options.linked_file {
            let link = FileLink {
                vid: *vid,
                options: options.options,
                name: link.clone(),
            };
            self.exec(&link, timeout).await?;
        }

        self.exec(&FileExit(options.exit_action), timeout).await?;

        if firmware {
            self.wait_for_flash(&mut progress).await?;
        }
        progress(100);

        info!("Saved {} ({} bytes)", name, data.len());
        Ok(())
    }

    /// Polls flash programming until it completes, for at most `flash_program_timeout`
    async fn wait_for_flash(&self, progress: &mut impl FnMut(u8)) -> Result<(), DeviceError> {
        let poll = async {
            loop {
                tokio::time::sleep(self.config.poll_interval).await;

                let status = self
                    .exec(&FactoryStatus, self.config.command_timeout)
                    .await?;
                if status.is_error() {
                    warn!("Flash programming failed with status {}", status.status);
                    return Err(DeviceError::FlashFailed);
                }

                debug!("Flash programming at {}%", status.percent);
                progress(scaled(status.percent as usize, 100, 50, 100));
                if status.is_complete() {
                    return Ok(());
                }
            }
        };

        match tokio::time::timeout(self.config.flash_program_timeout, poll).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Flash programming did not finish within {:?}",
                    self.config.flash_program_timeout
                );
                Err(RequestError::Timeout.into())
            }
        }
    }

    /// Reads a file back from the device.
    ///
    /// The contents are checked against the CRC the device reports, unless the read
    /// uses a caller supplied length or the device has no CRC for the region.
    pub async fn read_file(
        &self,
        name: &str,
        options: &FileReadOptions,
        mut progress: impl FnMut(u8),
    ) -> Result<Vec<u8>, DeviceError> {
        self.ready(true)?;
        let _guard = self.lock.lock().await;

        let timeout = if options.target.is_firmware_region() {
            self.config.flash_timeout
        } else {
            self.config.command_timeout
        };

        let transfer = self.exec(&options.init(name), timeout).await?;
        let length = options.length.unwrap_or(transfer.file_size) as usize;
        let chunk = chunk_size(transfer.packet_size, self.config.max_read_chunk);
        debug!("Reading {} bytes of {} in chunks of {}", length, name, chunk);

        let mut buffer = Vec::with_capacity(length);
        while buffer.len() < length {
            let want = usize::min(chunk, length - buffer.len());
            let read = FileDataRead {
                address: options.addr.wrapping_add(buffer.len() as u32),
                // Reads must be word sized
                size: ((want + 3) & !3) as u16,
            };

            let reply = self.exec(&read, timeout).await?;
            if reply.data.is_empty() {
                return Err(DecodeError::PacketLengthError.into());
            }
            buffer.extend(&reply.data[..usize::min(want, reply.data.len())]);
            progress(scaled(buffer.len(), length, 0, 99));
        }

        let verify = options.length.is_none() && transfer.crc != NO_CRC;
        let actual = crc32(&buffer);

        self.exec(&FileExit(FileExitAction::DoNothing), timeout)
            .await?;

        if verify && actual != transfer.crc {
            warn!("CRC mismatch reading {}", name);
            return Err(DeviceError::CrcMismatch {
                expected: transfer.crc,
                actual,
            });
        }

        progress(100);
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_scaled_into_its_share() {
        assert_eq!(scaled(5, 10, 0, 100), 50);
        assert_eq!(scaled(10, 10, 0, 50), 50);
        assert_eq!(scaled(0, 100, 50, 100), 50);
        assert_eq!(scaled(100, 100, 50, 100), 100);
        assert_eq!(scaled(20, 10, 0, 100), 100);
        assert_eq!(scaled(0, 0, 0, 50), 50);
    }
}
