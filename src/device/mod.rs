//! A connected product and everything that can be done with it.

pub mod file;
mod transfer;

pub use file::{FileInitOptions, FileReadOptions, DEFAULT_LOAD_ADDRESS};

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::commands::{
    Command, FactoryStatus, FactoryStatusResponse, FileDirCount, FileDirEntry, FileErase,
    FileGetInfo, FileLoad, FileSetInfo, FileUserStat, KvLoad, KvSave, SystemFlags, SystemStatus,
    SystemVersion, SystemVersionResponse, UserPlay, UserStop,
};
use crate::config::TransferConfig;
use crate::correlator::request_with_retry;
use crate::devices::{BleTransport, CharacteristicId, ProductCapabilities, ProductType};
use crate::errors::{DecodeError, DeviceError, RequestError};
use crate::events::{ConnectionState, DeviceEvent, DeviceInfo, EventBus};
use crate::fixed::read_u32_be;
use crate::meta::{DirectoryEntry, FileInfo, FileLoadAction, FileTransferOptions, FileVendor};
use crate::oad::{run_download, strategy_for, FirmwareImage, FirmwareUpdateStatus};
use crate::status::StatusDemux;

/// What the lock characteristic reads once the device accepts commands
pub const LOCK_UNLOCKED: u32 = 0xDEADFACE;

/// A session with one connected product.
///
/// Owns the transport. Requests are serialised by an internal lock so at most one
/// is waiting for a reply at a time.
pub struct Session<T: BleTransport> {
    transport: T,
    product: ProductType,
    caps: &'static ProductCapabilities,
    config: TransferConfig,
    events: EventBus,
    lock: Mutex<()>,
    pumps: Vec<JoinHandle<()>>,
    unlocked: bool,
}

impl<T: BleTransport> Session<T> {
    /// Sets up a session over an already connected transport.
    ///
    /// Runs the lock handshake and starts forwarding status notifications to `events`.
    /// A locked device still connects; it publishes [DeviceEvent::LockCodeRequested]
    /// and refuses commands until [Session::unlock] succeeds.
    pub async fn connect(
        transport: T,
        product: ProductType,
        config: TransferConfig,
        events: EventBus,
    ) -> Result<Self, DeviceError> {
        let caps = product.capabilities();
        events.publish(DeviceEvent::ConnectionState(ConnectionState::Connecting));

        let mut session = Session {
            transport,
            product,
            caps,
            config,
            events,
            lock: Mutex::new(()),
            pumps: Vec::new(),
            unlocked: !caps.lock_code,
        };

        if caps.lock_code {
            session.unlocked = session.read_lock().await?;
        }

        for id in caps.status {
            session.spawn_pump(*id).await?;
        }

        if session.unlocked {
            info!("Connected to {}", caps.name);
            session.publish_connected();
        } else {
            info!("{} is locked, waiting for a lock code", caps.name);
            session
                .events
                .publish(DeviceEvent::ConnectionState(ConnectionState::Locked));
            session.events.publish(DeviceEvent::LockCodeRequested);
        }

        Ok(session)
    }

    fn publish_connected(&self) {
        self.events
            .publish(DeviceEvent::ConnectionState(ConnectionState::Connected));
        self.events.publish(DeviceEvent::DeviceInfo(DeviceInfo {
            product: self.product,
            system_version: None,
        }));
    }

    /// Reads the lock characteristic, true if the device is unlocked
    async fn read_lock(&self) -> Result<bool, DeviceError> {
        let magic = self.transport.read(CharacteristicId::Lock).await?;
        let magic = read_u32_be(&magic, 0).ok_or(DeviceError::InvalidMagic)?;
        debug!("Lock reads {:#010x}", magic);
        Ok(magic == LOCK_UNLOCKED)
    }

    /// Forwards one characteristic's notifications through its own decoder
    async fn spawn_pump(&mut self, id: CharacteristicId) -> Result<(), DeviceError> {
        let mut subscription = self.transport.subscribe(id).await?;
        let events = self.events.clone();
        let mut demux = StatusDemux::new();

        info!("Listening for {:?}", id);
        self.pumps.push(tokio::spawn(async move {
            while let Some(data) = subscription.recv().await {
                if let Some(event) = demux.decode(id, &data) {
                    events.publish(event);
                }
            }
            debug!("{:?} notifications ended", id);
        }));

        Ok(())
    }

    /// Writes a lock code. Returns true once the device reports itself unlocked.
    pub async fn unlock(&mut self, code: u32) -> Result<bool, DeviceError> {
        if !self.caps.lock_code {
            return Err(DeviceError::Unsupported);
        }

        self.transport
            .write(CharacteristicId::Lock, &code.to_be_bytes())
            .await?;

        self.unlocked = self.read_lock().await?;
        if self.unlocked {
            info!("Lock code accepted");
            self.publish_connected();
        } else {
            warn!("Lock code rejected");
            self.events.publish(DeviceEvent::LockCodeRequested);
        }

        Ok(self.unlocked)
    }

    /// Stops the notification pumps and drops the connection
    pub async fn disconnect(&mut self) -> Result<(), DeviceError> {
        for pump in self.pumps.drain(..) {
            pump.abort();
        }
        self.unlocked = !self.caps.lock_code;

        let result = self.transport.disconnect().await;
        info!("Disconnected from {}", self.caps.name);
        self.events
            .publish(DeviceEvent::ConnectionState(ConnectionState::Disconnected));
        Ok(result?)
    }

    pub fn product(&self) -> ProductType {
        self.product
    }

    pub fn capabilities(&self) -> &'static ProductCapabilities {
        self.caps
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Receives every event this session publishes from now on
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    /// Fails unless the device accepts commands and, if asked, speaks CDC2
    fn ready(&self, cdc2: bool) -> Result<(), DeviceError> {
        if !self.unlocked {
            return Err(DeviceError::Locked);
        }
        if cdc2 && !self.caps.cdc2 {
            return Err(DeviceError::Unsupported);
        }
        Ok(())
    }

    /// Sends a command and receives its response
    pub async fn request<C: Command>(&self, command: C) -> Result<C::Response, DeviceError> {
        self.ready(false)?;
        let _guard = self.lock.lock().await;
        self.exec(&command, self.config.command_timeout).await
    }

    /// Sends a command without taking the request lock. The caller holds it.
    async fn exec<C: Command>(
        &self,
        command: &C,
        timeout: Duration,
    ) -> Result<C::Response, DeviceError> {
        let message = command.encode_request()?;
        let reply =
            request_with_retry(&self.transport, &message, timeout, self.config.retry_on_timeout)
                .await?;
        self.events.publish(DeviceEvent::AdminData(reply.clone()));

        command.decode_response(&reply).map_err(|e| {
            if let DecodeError::Nack(ack) = &e {
                warn!("Device refused the command: {}", ack);
            }
            RequestError::from(e).into()
        })
    }

    /// Lists the files in a namespace
    pub async fn list_files(&self, vid: FileVendor) -> Result<Vec<DirectoryEntry>, DeviceError> {
        self.ready(true)?;
        let _guard = self.lock.lock().await;
        let timeout = self.config.command_timeout;

        let count = self.exec(&FileDirCount { vid, options: 0 }, timeout).await?;
        debug!("{} files in {:?}", count, vid);

        let mut entries = Vec::with_capacity(count as usize);
        for index in 0..count.min(u8::MAX as u16 + 1) {
            let entry = FileDirEntry {
                index: index as u8,
                options: 0,
            };
            entries.push(self.exec(&entry, timeout).await?);
        }
        Ok(entries)
    }

    /// Metadata of one file, `None` if it does not exist
    pub async fn file_info(
        &self,
        vid: FileVendor,
        name: &str,
    ) -> Result<Option<FileInfo>, DeviceError> {
        self.ready(true)?;
        self.request(FileGetInfo {
            vid,
            options: 0,
            name: name.to_string(),
        })
        .await
    }

    pub async fn set_file_info(&self, info: FileSetInfo) -> Result<(), DeviceError> {
        self.ready(true)?;
        self.request(info).await
    }

    /// Erases a file. Erases can take a while, so they get a longer timeout.
    pub async fn erase_file(&self, vid: FileVendor, name: &str) -> Result<(), DeviceError> {
        self.ready(true)?;
        let _guard = self.lock.lock().await;
        let erase = FileErase {
            vid,
            options: FileTransferOptions::NONE,
            name: name.to_string(),
        };
        self.exec(&erase, self.config.erase_timeout).await
    }

    /// Runs or stops a program already on the device
    pub async fn load_program(
        &self,
        vid: FileVendor,
        name: &str,
        action: FileLoadAction,
    ) -> Result<(), DeviceError> {
        self.ready(true)?;
        self.request(FileLoad {
            vid,
            action,
            name: name.to_string(),
        })
        .await
    }

    /// The program slot a file is assigned to
    pub async fn user_slot(&self, vid: FileVendor, name: &str) -> Result<u8, DeviceError> {
        self.ready(true)?;
        self.request(FileUserStat {
            vid,
            options: 0,
            name: name.to_string(),
        })
        .await
    }

    pub async fn kv_read(&self, key: &str) -> Result<String, DeviceError> {
        self.ready(true)?;
        self.request(KvLoad(key)).await
    }

    pub async fn kv_write(&self, key: &str, value: &str) -> Result<(), DeviceError> {
        self.ready(true)?;
        self.request(KvSave(key, value)).await
    }

    pub async fn factory_status(&self) -> Result<FactoryStatusResponse, DeviceError> {
        self.ready(true)?;
        self.request(FactoryStatus).await
    }

    pub async fn system_flags(&self) -> Result<u32, DeviceError> {
        self.ready(true)?;
        Ok(self.request(SystemFlags).await?.flags)
    }

    pub async fn system_version(&self) -> Result<SystemVersionResponse, DeviceError> {
        self.request(SystemVersion).await
    }

    /// Asks the device for its firmware version and publishes it
    pub async fn refresh_device_info(&self) -> Result<DeviceInfo, DeviceError> {
        let version = if self.caps.cdc2 {
            let status = self.request(SystemStatus).await?;
            let [a, b, c, d] = status.system_version;
            format!("{a}.{b}.{c}.{d}")
        } else {
            self.request(SystemVersion).await?.version_string()
        };

        let info = DeviceInfo {
            product: self.product,
            system_version: Some(version),
        };
        self.events.publish(DeviceEvent::DeviceInfo(info.clone()));
        Ok(info)
    }

    /// Starts the program in a slot, on products with the legacy command set
    pub async fn play(&self, slot: u8) -> Result<(), DeviceError> {
        if !self.caps.legacy {
            return Err(DeviceError::Unsupported);
        }
        self.request(UserPlay(slot)).await
    }

    pub async fn stop(&self) -> Result<(), DeviceError> {
        if !self.caps.legacy {
            return Err(DeviceError::Unsupported);
        }
        self.request(UserStop).await
    }

    /// Writes raw bytes to the user program's serial channel
    pub async fn write_user(&self, data: &[u8]) -> Result<(), DeviceError> {
        self.ready(false)?;
        if !self.caps.has(CharacteristicId::UserTx) {
            return Err(DeviceError::Unsupported);
        }
        Ok(self.transport.write(CharacteristicId::UserTx, data).await?)
    }

    /// Downloads a firmware image over the air.
    ///
    /// Progress and the outcome are published as events. Any failure disconnects
    /// the session; downloads are never resumed.
    pub async fn update_firmware(
        &mut self,
        image: FirmwareImage,
    ) -> Result<FirmwareUpdateStatus, DeviceError> {
        let target = self.caps.oad.ok_or(DeviceError::Unsupported)?;
        self.ready(false)?;

        info!("Starting {:?} firmware download for {}", target, self.caps.name);
        let mut strategy = strategy_for(target, image);
        let events = self.events.clone();
        let status = run_download(
            &self.transport,
            strategy.as_mut(),
            self.config.oad_timeout,
            |percent| events.publish(DeviceEvent::FirmwareProgress(percent)),
        )
        .await;

        self.events.publish(DeviceEvent::FirmwareStatus(status));
        if !status.is_success() {
            if let Err(e) = self.disconnect().await {
                warn!("Disconnect after failed download also failed: {}", e);
            }
        }

        Ok(status)
    }
}

impl<T: BleTransport> Drop for Session<T> {
    fn drop(&mut self) {
        for pump in &self.pumps {
            pump.abort();
        }
    }
}

impl<T: BleTransport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("product", &self.product)
            .field("unlocked", &self.unlocked)
            .field("pumps", &self.pumps.len())
            .finish_non_exhaustive()
    }
}
