//! Timeouts, chunk sizes and the runtime transfer configuration

use std::time::Duration;

/// The default timeout for a command reply
pub const COMMAND_TIMEOUT: Duration = Duration::from_millis(2000);

/// Timeout for each step of a transfer to a firmware region
pub const FLASH_TIMEOUT: Duration = Duration::from_millis(30000);

/// Timeout for erasing a file or a namespace
pub const ERASE_TIMEOUT: Duration = Duration::from_millis(15000);

/// How often flash programming progress is polled after a firmware region transfer
pub const FACTORY_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Longest flash programming may take after a firmware region transfer is committed
pub const FLASH_PROGRAM_TIMEOUT: Duration = Duration::from_secs(120);

/// How long to wait for the next firmware download notification
pub const OAD_NOTIFY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Ceiling for file write chunks, also the fallback when the device negotiates nonsense
pub const MAX_WRITE_CHUNK: u16 = 4096;

/// Ceiling for file read chunks. Reads are limited by the notify MTU.
pub const MAX_READ_CHUNK: u16 = 232;

/// The default time to scan for advertising devices
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Capacity of each session's event channel
pub const EVENT_CAPACITY: usize = 256;

/// Knobs for a session's requests and transfers. [Default] gives the constants above.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferConfig {
    pub command_timeout: Duration,
    pub flash_timeout: Duration,
    pub erase_timeout: Duration,
    pub poll_interval: Duration,
    /// Bounds the whole flash programming poll, not each poll
    pub flash_program_timeout: Duration,
    pub oad_timeout: Duration,
    pub max_write_chunk: u16,
    pub max_read_chunk: u16,
    /// Re-send a command once if its reply never arrives
    pub retry_on_timeout: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            command_timeout: COMMAND_TIMEOUT,
            flash_timeout: FLASH_TIMEOUT,
            erase_timeout: ERASE_TIMEOUT,
            poll_interval: FACTORY_POLL_INTERVAL,
            flash_program_timeout: FLASH_PROGRAM_TIMEOUT,
            oad_timeout: OAD_NOTIFY_TIMEOUT,
            max_write_chunk: MAX_WRITE_CHUNK,
            max_read_chunk: MAX_READ_CHUNK,
            retry_on_timeout: false,
        }
    }
}

/// Picks a transfer chunk size from what the device negotiated.
/// Falls back to `ceiling` when the device reports 0 or more than the ceiling.
pub fn chunk_size(negotiated: u16, ceiling: u16) -> usize {
    let size = if negotiated == 0 || negotiated > ceiling {
        ceiling
    } else {
        negotiated
    };

    // Chunks must stay word aligned
    match size & !3 {
        0 => (ceiling & !3).max(4) as usize,
        aligned => aligned as usize,
    }
}
