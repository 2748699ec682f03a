//! Transport seams of the exchange
//!
//! The exchange only ever talks to [`EnvelopeEncoder`]s and
//! [`EnvelopeDecoder`]s. Network connections obtained from a [`Dialer`] are
//! framed into both, and the same-node short-circuit implements them too.

use super::wire::Envelope;
use crate::data::types;
use crate::dataset::Dataset;
use async_trait::async_trait;
use bytes::Bytes;
use ferry_common::{EOF_MESSAGE, FerryError, Result, TransportContext};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::debug;

/// A bidirectional byte stream to one peer.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T> Connection for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

/// Resolves node addresses to connections. Supplied by the cluster layer.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open the connection to `addr` for the exchange session `uid`.
    ///
    /// Both ends of a peer pair dial each other with the same uid and must be
    /// handed the two ends of one stream.
    async fn connect(&self, addr: &str, uid: &str) -> Result<Box<dyn Connection>>;
}

/// Sending side of a connection.
#[async_trait]
pub trait EnvelopeEncoder: Send {
    async fn encode(&mut self, envelope: &Envelope) -> Result<()>;

    /// Release the connection. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Receiving side of a connection.
#[async_trait]
pub trait EnvelopeDecoder: Send {
    /// The next dataset, or `None` once the source reached end of stream.
    async fn decode(&mut self) -> Result<Option<Dataset>>;
}

type ConnectionReader = ReadHalf<Box<dyn Connection>>;
type ConnectionWriter = WriteHalf<Box<dyn Connection>>;

/// Split a connection into a length-delimited encoder and decoder pair.
pub fn framed(
    conn: Box<dyn Connection>,
    peer: &str,
    max_frame_length: usize,
) -> (FramedEnvelopeEncoder, FramedEnvelopeDecoder) {
    let (reader, writer) = tokio::io::split(conn);
    let codec = || {
        LengthDelimitedCodec::builder()
            .max_frame_length(max_frame_length)
            .new_codec()
    };

    let encoder = FramedEnvelopeEncoder {
        peer: peer.to_string(),
        sink: FramedWrite::new(writer, codec()),
        closed: false,
    };
    let decoder = FramedEnvelopeDecoder {
        peer: peer.to_string(),
        stream: FramedRead::new(reader, codec()),
        done: false,
    };
    (encoder, decoder)
}

pub struct FramedEnvelopeEncoder {
    peer: String,
    sink: FramedWrite<ConnectionWriter, LengthDelimitedCodec>,
    closed: bool,
}

#[async_trait]
impl EnvelopeEncoder for FramedEnvelopeEncoder {
    async fn encode(&mut self, envelope: &Envelope) -> Result<()> {
        if self.closed {
            return Err(FerryError::transport_error(format!(
                "connection to {} is closed",
                self.peer
            )));
        }
        let frame = Bytes::from(envelope.to_bytes()?);
        self.sink
            .send(frame)
            .await
            .transport_context(format!("failed to send to {}", self.peer))
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        SinkExt::<Bytes>::close(&mut self.sink)
            .await
            .transport_context(format!("failed to close connection to {}", self.peer))
    }
}

pub struct FramedEnvelopeDecoder {
    peer: String,
    stream: FramedRead<ConnectionReader, LengthDelimitedCodec>,
    done: bool,
}

#[async_trait]
impl EnvelopeDecoder for FramedEnvelopeDecoder {
    async fn decode(&mut self) -> Result<Option<Dataset>> {
        if self.done {
            return Ok(None);
        }

        let frame = match self.stream.next().await {
            Some(frame) => frame.transport_context(format!("failed to read from {}", self.peer))?,
            None => {
                debug!("Connection from {} closed without end of stream", self.peer);
                self.done = true;
                return Ok(None);
            }
        };

        match Envelope::from_bytes(&frame, types())? {
            Envelope::Payload(data) => Ok(Some(data)),
            Envelope::Error { message } if message == EOF_MESSAGE => {
                self.done = true;
                Ok(None)
            }
            Envelope::Error { message } => {
                self.done = true;
                Err(FerryError::remote_peer(&self.peer, message))
            }
        }
    }
}
