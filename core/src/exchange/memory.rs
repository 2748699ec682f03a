//! In-process network for running several nodes inside one runtime.

use super::transport::{Connection, Dialer};
use async_trait::async_trait;
use ferry_common::{FerryError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::DuplexStream;
use tracing::debug;

type PairKey = (String, String, String);

/// Hands out [`Dialer`]s for named nodes that reach each other through
/// `tokio::io::duplex` pipes.
///
/// When node `a` dials `b` for session `uid`, one end of a new pipe is
/// returned and the other end is parked until `b` dials `a` for the same uid.
#[derive(Clone, Debug)]
pub struct MemoryNetwork {
    pending: Arc<Mutex<HashMap<PairKey, DuplexStream>>>,
    buffer: usize,
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new(64 * 1024)
    }
}

impl MemoryNetwork {
    /// `buffer` is the per-direction pipe capacity in bytes.
    pub fn new(buffer: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            buffer: buffer.max(1),
        }
    }

    /// The dialer used by `node`.
    pub fn dialer(&self, node: &str) -> Arc<dyn Dialer> {
        Arc::new(MemoryDialer {
            node: node.to_string(),
            network: self.clone(),
        })
    }

    /// Number of dials still waiting for their peer.
    pub fn pending(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<PairKey, DuplexStream>>> {
        self.pending
            .lock()
            .map_err(|_| FerryError::transport_error("memory network state is poisoned"))
    }
}

#[derive(Debug)]
struct MemoryDialer {
    node: String,
    network: MemoryNetwork,
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn connect(&self, addr: &str, uid: &str) -> Result<Box<dyn Connection>> {
        if addr == self.node {
            return Err(FerryError::transport_error(format!(
                "node {} cannot dial itself",
                addr
            )));
        }

        let mut pending = self.network.lock()?;
        let parked = (addr.to_string(), self.node.clone(), uid.to_string());
        if let Some(end) = pending.remove(&parked) {
            debug!("{} accepted connection from {} for {}", self.node, addr, uid);
            return Ok(Box::new(end));
        }

        let (ours, theirs) = tokio::io::duplex(self.network.buffer);
        pending.insert((self.node.clone(), addr.to_string(), uid.to_string()), theirs);
        debug!("{} dialed {} for {}", self.node, addr, uid);
        Ok(Box::new(ours))
    }
}
