//! Turns "write a command, get notified of the reply" into an awaitable request.
//!
//! Replies are matched to requests only by arriving next on the reply
//! characteristic, so callers keep at most one request outstanding per connection.

use std::time::Duration;

use log::{debug, trace, warn};

use crate::commands::{decode_length, Cdc2Message, ReplyLength, ReplyToken};
use crate::devices::{BleTransport, CharacteristicId};
use crate::errors::{RequestError, TransportError};
use crate::protocol::{HEADER_REPLY, REPLY_ENVELOPE_LEN};

/// Accumulates the notifications that make up one reply
#[derive(Clone, Debug)]
pub struct ReplyBuffer {
    requested: ReplyLength,
    expected: ReplyLength,
    token: Option<ReplyToken>,
    data: Vec<u8>,
}

impl ReplyBuffer {
    pub fn new(message: &Cdc2Message) -> Self {
        ReplyBuffer {
            requested: message.reply_length,
            expected: message.reply_length,
            token: message.reply_token,
            data: Vec::new(),
        }
    }

    /// The expected reply length, resolved once the length field has arrived
    pub fn expected(&self) -> ReplyLength {
        self.expected
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the bytes that start a reply belong to this request.
    /// Fragments that cannot be told apart yet are accepted.
    fn is_ours(&self, chunk: &[u8]) -> bool {
        let Some(token) = self.token else {
            return true;
        };

        // A header split across notifications is kept until the rest arrives
        let head = &chunk[..chunk.len().min(HEADER_REPLY.len())];
        if !HEADER_REPLY.starts_with(head) {
            // The tail of an earlier reply
            return false;
        }

        match chunk.get(2) {
            Some(cmd) if *cmd != token.cmd => return false,
            None => return true,
            _ => {}
        }

        match (token.ecmd, chunk.get(3..).and_then(decode_length)) {
            (Some(ecmd), Some((_, consumed))) => chunk
                .get(3 + consumed)
                .map_or(true, |got| *got == ecmd),
            _ => true,
        }
    }

    /// Appends one notification. Returns true once the reply is complete.
    pub fn push(&mut self, chunk: &[u8]) -> bool {
        self.data.extend_from_slice(chunk);
        if !self.is_ours(&self.data) {
            let buffered = self.data.len() - chunk.len();
            if buffered > 0 && self.is_ours(chunk) {
                // What was buffered was not ours, but this chunk starts a reply that is
                self.data.drain(..buffered);
                self.expected = self.requested;
            } else {
                debug!("Discarding notification for another request: {:02x?}", chunk);
                self.data.clear();
                self.expected = self.requested;
                return false;
            }
        }

        if self.expected == ReplyLength::Unknown && self.data.len() >= REPLY_ENVELOPE_LEN {
            if let Some((length, consumed)) = decode_length(&self.data[3..]) {
                let expected = REPLY_ENVELOPE_LEN + length as usize + (consumed - 1);
                trace!("Reply length resolved to {}", expected);
                self.expected = ReplyLength::Exact(expected);
            }
        }

        self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        match self.expected {
            ReplyLength::Exact(n) => self.data.len() >= n,
            ReplyLength::Unknown => false,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

/// Writes `message` to `tx` and collects its reply from `rx`.
///
/// The listener is registered before the write and dropped on every exit path. A
/// failed write returns at once without waiting for the timeout.
pub async fn send_and_await<T: BleTransport>(
    transport: &T,
    tx: CharacteristicId,
    rx: CharacteristicId,
    message: &Cdc2Message,
    timeout: Duration,
) -> Result<Vec<u8>, RequestError> {
    let mut subscription = transport.subscribe(rx).await?;

    trace!("-> {:02x?}", message.payload);
    if let Err(e) = transport.write(tx, &message.payload).await {
        warn!("Write to {:?} failed: {}", tx, e);
        return Err(e.into());
    }

    let mut reply = ReplyBuffer::new(message);
    let collect = async {
        while let Some(chunk) = subscription.recv().await {
            if reply.push(&chunk) {
                return Ok(());
            }
        }
        Err(RequestError::Transport(TransportError::NotConnected))
    };

    match tokio::time::timeout(timeout, collect).await {
        Ok(Ok(())) => {
            let data = reply.into_inner();
            trace!("<- {:02x?}", data);
            Ok(data)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            debug!(
                "No complete reply within {:?}, have {} bytes",
                timeout,
                reply.len()
            );
            Err(RequestError::Timeout)
        }
    }
}

/// [send_and_await] on the admin channel, sent once more if the first attempt times out
/// and `retry_on_timeout` is set. Nothing else is retried.
pub async fn request_with_retry<T: BleTransport>(
    transport: &T,
    message: &Cdc2Message,
    timeout: Duration,
    retry_on_timeout: bool,
) -> Result<Vec<u8>, RequestError> {
    let tx = CharacteristicId::AdminTx;
    let rx = CharacteristicId::AdminRx;

    match send_and_await(transport, tx, rx, message, timeout).await {
        Err(e) if e.is_retryable() && retry_on_timeout => {
            debug!("Request timed out, retrying once");
            send_and_await(transport, tx, rx, message, timeout).await
        }
        result => result,
    }
}
