//! Envelope framing shared by network connections and the short-circuit.

use crate::data::{DataRef, TypeRegistry};
use crate::dataset::Dataset;
use bincode::{Decode, Encode};
use ferry_common::{EOF_MESSAGE, FerryError, Result};
use std::sync::Arc;

/// One unit on an exchange connection: a dataset, or a terminal error.
///
/// End of stream is an error envelope whose message is [`EOF_MESSAGE`], sent
/// on the same connection as the data so a receiver learns that a specific
/// source is finished without relying on the connection being closed.
#[derive(Debug, Clone)]
pub enum Envelope {
    Payload(Dataset),
    Error { message: String },
}

/// Bincode form of an envelope. Columns travel as their registered type name
/// plus the bytes produced by `Data::encode`.
#[derive(Debug, Encode, Decode)]
enum WireEnvelope {
    Payload(Vec<WireColumn>),
    Error(String),
}

#[derive(Debug, Encode, Decode)]
struct WireColumn {
    type_name: String,
    values: Vec<u8>,
}

impl Envelope {
    /// The end-of-stream envelope.
    pub fn eof() -> Self {
        Envelope::Error {
            message: EOF_MESSAGE.to_string(),
        }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self, Envelope::Error { message } if message == EOF_MESSAGE)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let wire = match self {
            Envelope::Payload(data) => {
                let columns = data
                    .columns()
                    .iter()
                    .map(|col| {
                        Ok(WireColumn {
                            type_name: col.data_type().name().to_string(),
                            values: col.encode()?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                WireEnvelope::Payload(columns)
            }
            Envelope::Error { message } => WireEnvelope::Error(message.clone()),
        };

        bincode::encode_to_vec(&wire, bincode::config::standard())
            .map_err(|e| FerryError::codec_error(format!("failed to encode envelope: {}", e)))
    }

    /// Decode an envelope, resolving column types by name through `registry`.
    pub fn from_bytes(bytes: &[u8], registry: &TypeRegistry) -> Result<Self> {
        let (wire, _): (WireEnvelope, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| FerryError::codec_error(format!("failed to decode envelope: {}", e)))?;

        match wire {
            WireEnvelope::Error(message) => Ok(Envelope::Error { message }),
            WireEnvelope::Payload(columns) => {
                let columns = columns
                    .into_iter()
                    .map(|col| {
                        let ty = registry.resolve(&col.type_name)?;
                        let data: DataRef = Arc::from(ty.decode(&col.values)?);
                        Ok(data)
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Envelope::Payload(Dataset::new(columns)?))
            }
        }
    }
}
