use std::collections::HashMap;
use std::time::Duration;

use bluest::{Adapter, AdvertisingDevice, Characteristic};
use log::{debug, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;

use super::{BleTransport, CharacteristicId, ProductType, Subscription};
use crate::config::SCAN_TIMEOUT;
use crate::errors::{DeviceError, TransportError};

/// A product that is advertising over bluetooth and can be connected to
#[derive(Clone, Debug)]
pub struct BluetoothDevice {
    adapter: Adapter,
    device: AdvertisingDevice,
    product: ProductType,
}

impl BluetoothDevice {
    pub fn new(adapter: Adapter, device: AdvertisingDevice, product: ProductType) -> Self {
        BluetoothDevice {
            adapter,
            device,
            product,
        }
    }

    pub fn product(&self) -> ProductType {
        self.product
    }

    /// The advertised name, if the device sent one
    pub fn name(&self) -> Option<&str> {
        self.device.adv_data.local_name.as_deref()
    }

    pub fn rssi(&self) -> Option<i16> {
        self.device.rssi
    }

    /// Connects to the device and discovers the characteristics its product uses
    pub async fn connect(self) -> Result<BluetoothTransport, DeviceError> {
        let caps = self.product.capabilities();

        // Wait for the adapter to be available
        self.adapter.wait_available().await?;

        // For some reason we need a little delay in here
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Connect to the device
        self.adapter.connect_device(&self.device.device).await?;

        // And here too
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Get all services on the device
        let services = self.device.device.discover_services().await?;

        let mut wanted = vec![caps.service];
        if let Some(oad) = caps.oad {
            wanted.push(oad.service());
        }

        let mut characteristics = HashMap::new();
        for service in services.iter().filter(|s| wanted.contains(&s.uuid())) {
            for characteristic in service.discover_characteristics().await? {
                let id = caps
                    .characteristics
                    .iter()
                    .chain(caps.oad.map(|o| o.characteristics()).unwrap_or(&[]))
                    .find(|(_, uuid)| *uuid == characteristic.uuid())
                    .map(|(id, _)| *id);

                if let Some(id) = id {
                    debug!("Found {:?} at {}", id, characteristic.uuid());
                    characteristics.insert(id, characteristic);
                }
            }
        }

        // Without the admin channel there is nothing we can do
        if !characteristics.contains_key(&CharacteristicId::AdminTx)
            || !characteristics.contains_key(&CharacteristicId::AdminRx)
        {
            return Err(DeviceError::InvalidDevice);
        }

        info!("Connected to {} ({})", self.name().unwrap_or("unnamed"), caps.name);

        Ok(BluetoothTransport {
            adapter: self.adapter,
            device: self.device,
            characteristics,
        })
    }
}

/// [BleTransport] over a connected bluest device
#[derive(Debug)]
pub struct BluetoothTransport {
    adapter: Adapter,
    device: AdvertisingDevice,
    characteristics: HashMap<CharacteristicId, Characteristic>,
}

impl BluetoothTransport {
    fn characteristic(&self, id: CharacteristicId) -> Result<&Characteristic, TransportError> {
        self.characteristics
            .get(&id)
            .ok_or(TransportError::UnknownCharacteristic(id))
    }
}

impl BleTransport for BluetoothTransport {
    async fn write(&self, id: CharacteristicId, data: &[u8]) -> Result<(), TransportError> {
        let characteristic = self.characteristic(id)?;

        // Image blocks are streamed without waiting for a response
        if id == CharacteristicId::OadBlock {
            Ok(characteristic.write_without_response(data).await)
        } else {
            Ok(characteristic.write(data).await?)
        }
    }

    async fn read(&self, id: CharacteristicId) -> Result<Vec<u8>, TransportError> {
        Ok(self.characteristic(id)?.read().await?)
    }

    async fn subscribe(&self, id: CharacteristicId) -> Result<Subscription, TransportError> {
        let characteristic = self.characteristic(id)?.clone();
        let (tx, rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let stream = match characteristic.notify().await {
                Ok(stream) => {
                    let _ = ready_tx.send(Ok(()));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            tokio::pin!(stream);

            while let Some(value) = stream.next().await {
                match value {
                    Ok(value) => {
                        if tx.send(value).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Notification stream for {:?} failed: {}", id, e);
                        break;
                    }
                }
            }
        });

        // Notifications are only delivered once the platform has enabled them
        match ready_rx.await {
            Ok(Ok(())) => Ok(Subscription::new(rx, move || task.abort())),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(TransportError::Gatt(format!(
                "notification task for {id:?} ended early"
            ))),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        // Disconnect the device
        self.adapter.disconnect_device(&self.device.device).await?;
        Ok(())
    }
}

/// Discovers all devices of a product that are advertising over bluetooth.
/// By default it scans for five seconds, but this can be configured
pub async fn scan_for_devices(
    product: ProductType,
    timeout: Option<Duration>,
) -> Result<Vec<BluetoothDevice>, DeviceError> {
    let timeout = timeout.unwrap_or(SCAN_TIMEOUT);

    // Get the adapter and wait for it to be available
    let adapter = Adapter::default()
        .await
        .ok_or(DeviceError::NoBluetoothAdapter)?;
    adapter.wait_available().await?;

    // Start scanning
    let service = [product.capabilities().service];
    let scan_stream = adapter.scan(&service).await?;

    // Set a timeout
    let timeout_stream = scan_stream.timeout(timeout);
    tokio::pin!(timeout_stream);

    let deadline = tokio::time::Instant::now() + timeout;
    let mut devices = Vec::<BluetoothDevice>::new();

    // Find each device
    while let Ok(Some(discovered_device)) = timeout_stream.try_next().await {
        if !devices
            .iter()
            .any(|d| d.device.device.id() == discovered_device.device.id())
        {
            debug!(
                "Discovered {:?}",
                discovered_device.adv_data.local_name.as_deref()
            );
            devices.push(BluetoothDevice::new(
                adapter.clone(),
                discovered_device,
                product,
            ));
        }

        // If the timeout has passed, then break
        if tokio::time::Instant::now() >= deadline {
            break;
        }
    }

    Ok(devices)
}
