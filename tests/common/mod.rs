//! An in-memory transport with scripted replies
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use vexble::devices::{BleTransport, CharacteristicId, Subscription};
use vexble::errors::TransportError;

/// Maps one write onto the notifications the device would send back
pub type Responder =
    Box<dyn FnMut(CharacteristicId, &[u8]) -> Vec<(CharacteristicId, Vec<u8>)> + Send>;

#[derive(Default)]
struct Inner {
    writes: Vec<(CharacteristicId, Vec<u8>)>,
    listeners: HashMap<CharacteristicId, Vec<(u64, mpsc::UnboundedSender<Vec<u8>>)>>,
    next_listener: u64,
    reads: HashMap<CharacteristicId, Vec<u8>>,
    fail_writes: bool,
    disconnected: bool,
}

#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<Inner>>,
    responder: Arc<Mutex<Responder>>,
}

impl MockTransport {
    pub fn new(
        responder: impl FnMut(CharacteristicId, &[u8]) -> Vec<(CharacteristicId, Vec<u8>)>
            + Send
            + 'static,
    ) -> Self {
        MockTransport {
            inner: Arc::default(),
            responder: Arc::new(Mutex::new(Box::new(responder))),
        }
    }

    /// A device that never answers
    pub fn silent() -> Self {
        Self::new(|_, _| Vec::new())
    }

    /// Answers admin commands with `reply`, delivered on the admin reply characteristic
    pub fn admin(mut reply: impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static) -> Self {
        Self::new(move |id, data| match id {
            CharacteristicId::AdminTx => reply(data)
                .map(|r| vec![(CharacteristicId::AdminRx, r)])
                .unwrap_or_default(),
            _ => Vec::new(),
        })
    }

    pub fn set_read(&self, id: CharacteristicId, value: &[u8]) {
        self.inner.lock().unwrap().reads.insert(id, value.to_vec());
    }

    pub fn fail_writes(&self, fail: bool) {
        self.inner.lock().unwrap().fail_writes = fail;
    }

    /// Every write so far, in order
    pub fn writes(&self) -> Vec<(CharacteristicId, Vec<u8>)> {
        self.inner.lock().unwrap().writes.clone()
    }

    pub fn writes_to(&self, id: CharacteristicId) -> Vec<Vec<u8>> {
        self.writes()
            .into_iter()
            .filter(|(c, _)| *c == id)
            .map(|(_, data)| data)
            .collect()
    }

    pub fn listener_count(&self, id: CharacteristicId) -> usize {
        self.inner
            .lock()
            .unwrap()
            .listeners
            .get(&id)
            .map_or(0, |l| l.len())
    }

    pub fn is_disconnected(&self) -> bool {
        self.inner.lock().unwrap().disconnected
    }

    /// Delivers a notification to everyone listening on `id`
    pub fn notify(&self, id: CharacteristicId, data: &[u8]) {
        if let Some(listeners) = self.inner.lock().unwrap().listeners.get(&id) {
            for (_, tx) in listeners {
                let _ = tx.send(data.to_vec());
            }
        }
    }
}

impl BleTransport for MockTransport {
    async fn write(&self, id: CharacteristicId, data: &[u8]) -> Result<(), TransportError> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.fail_writes {
                return Err(TransportError::Gatt("write rejected".to_string()));
            }
            inner.writes.push((id, data.to_vec()));
        }

        let replies = {
            let mut responder = self.responder.lock().unwrap();
            (*responder)(id, data)
        };
        for (id, reply) in replies {
            self.notify(id, &reply);
        }
        Ok(())
    }

    async fn read(&self, id: CharacteristicId) -> Result<Vec<u8>, TransportError> {
        self.inner
            .lock()
            .unwrap()
            .reads
            .get(&id)
            .cloned()
            .ok_or(TransportError::UnknownCharacteristic(id))
    }

    async fn subscribe(&self, id: CharacteristicId) -> Result<Subscription, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let key = {
            let mut inner = self.inner.lock().unwrap();
            let key = inner.next_listener;
            inner.next_listener += 1;
            inner.listeners.entry(id).or_default().push((key, tx));
            key
        };

        let inner = self.inner.clone();
        Ok(Subscription::new(rx, move || {
            if let Some(listeners) = inner.lock().unwrap().listeners.get_mut(&id) {
                listeners.retain(|(k, _)| *k != key);
            }
        }))
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.disconnected = true;
        inner.listeners.clear();
        Ok(())
    }
}

/// The extended command byte of a CDC2 frame
pub fn ecmd_of(frame: &[u8]) -> Option<u8> {
    match frame.get(4) {
        Some(0x56) => frame.get(5).copied(),
        _ => None,
    }
}

/// The command byte of a legacy frame
pub fn cmd_of(frame: &[u8]) -> Option<u8> {
    frame.get(4).copied()
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
