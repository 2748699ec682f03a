//! In-process pipe used when an exchange sends to its own node.

use super::transport::{EnvelopeDecoder, EnvelopeEncoder};
use super::wire::Envelope;
use crate::dataset::Dataset;
use async_trait::async_trait;
use ferry_common::{FerryError, Result};
use tokio::sync::mpsc;

/// Create a bounded short-circuit pipe. Envelopes are passed by value, no
/// serialization happens.
pub fn channel(capacity: usize) -> (ShortCircuitSender, ShortCircuitReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        ShortCircuitSender { tx: Some(tx) },
        ShortCircuitReceiver { rx, done: false },
    )
}

#[derive(Debug)]
pub struct ShortCircuitSender {
    tx: Option<mpsc::Sender<Envelope>>,
}

#[async_trait]
impl EnvelopeEncoder for ShortCircuitSender {
    async fn encode(&mut self, envelope: &Envelope) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| FerryError::transport_error("short-circuit pipe is closed"))?;
        tx.send(envelope.clone())
            .await
            .map_err(|_| FerryError::transport_error("short-circuit receiver is gone"))
    }

    async fn close(&mut self) -> Result<()> {
        self.tx.take();
        Ok(())
    }
}

#[derive(Debug)]
pub struct ShortCircuitReceiver {
    rx: mpsc::Receiver<Envelope>,
    done: bool,
}

#[async_trait]
impl EnvelopeDecoder for ShortCircuitReceiver {
    async fn decode(&mut self) -> Result<Option<Dataset>> {
        if self.done {
            return Ok(None);
        }
        match self.rx.recv().await {
            Some(Envelope::Payload(data)) => Ok(Some(data)),
            Some(Envelope::Error { message }) if message == ferry_common::EOF_MESSAGE => {
                self.done = true;
                Ok(None)
            }
            Some(Envelope::Error { message }) => {
                self.done = true;
                Err(FerryError::remote_peer("local", message))
            }
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}
