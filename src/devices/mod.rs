//! The transport seam between the protocol core and a BLE platform stack.
//!
//! Everything above this module talks to a device through [BleTransport] and
//! names characteristics with [CharacteristicId]. The product table in
//! [products] maps those names onto the GATT UUIDs of each product.

use tokio::sync::mpsc;

use crate::errors::TransportError;

pub mod bluetooth;
pub mod products;

pub use products::{OadTarget, ProductCapabilities, ProductType};

/// Logical names for the characteristics the core reads, writes and listens on
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CharacteristicId {
    /// Admin channel, commands are written here
    AdminTx,
    /// Admin channel, replies are notified here
    AdminRx,
    UserTx,
    UserRx,
    /// Reads 0xDEADFACE when unlocked, lock codes are written here
    Lock,
    PortStatus,
    SensorStatus,
    AiVision,
    OadControl,
    OadIdentify,
    OadBlock,
}

/// A live notification listener.
///
/// Notifications are delivered in arrival order. Dropping the subscription
/// unregisters the listener, so every exit path of a caller tears it down.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Vec<u8>>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Subscription {
            rx,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    /// Waits for the next notification. `None` once the transport stops delivering.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// The GATT primitives the core needs from a platform.
///
/// Values may be fragmented across notifications, and notifications may never
/// arrive at all. Callers handle both.
#[allow(async_fn_in_trait)]
pub trait BleTransport {
    /// Writes a value, failing with a GATT error if the platform rejects it
    async fn write(&self, characteristic: CharacteristicId, data: &[u8])
        -> Result<(), TransportError>;

    async fn read(&self, characteristic: CharacteristicId) -> Result<Vec<u8>, TransportError>;

    /// Starts listening for notifications. Listening stops when the
    /// returned [Subscription] is dropped.
    async fn subscribe(
        &self,
        characteristic: CharacteristicId,
    ) -> Result<Subscription, TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn subscription_runs_teardown_once_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = dropped.clone();

        let mut sub = Subscription::new(rx, move || flag.store(true, Ordering::SeqCst));
        tx.send(vec![1, 2]).unwrap();
        tx.send(vec![3]).unwrap();
        assert_eq!(sub.recv().await, Some(vec![1, 2]));
        assert_eq!(sub.recv().await, Some(vec![3]));
        assert!(!dropped.load(Ordering::SeqCst));

        drop(sub);
        assert!(dropped.load(Ordering::SeqCst));
    }
}
