//! The exchange operator
//!
//! An [`Exchange`] moves datasets between the nodes of a cluster. Every node
//! runs its own instance of the same plan; instances rendezvous through the
//! session uid minted when the plan was built and carried verbatim when the
//! plan is shipped to peers.
//!
//! Traffic to the local node never touches the network: it goes through a
//! [`short_circuit`] pipe. Every destination receives an end-of-stream
//! envelope before the exchange exits, also on failure or cancellation, so
//! peers blocked on receive are always released. After an early exit the
//! exchange keeps reading, discarding what arrives, until its own sources
//! have ended or the shutdown timeout passes.

pub mod memory;
pub mod merge;
pub mod ring;
pub mod short_circuit;
pub mod transport;
pub mod wire;

pub use memory::MemoryNetwork;
pub use merge::{SortedMerge, SortingCol};
pub use ring::HashRing;
pub use transport::{Connection, Dialer, EnvelopeDecoder, EnvelopeEncoder};
pub use wire::Envelope;

use crate::context::ExecutionContext;
use crate::data::{TypeRef, wildcard};
use crate::dataset::Dataset;
use crate::runner::Runner;
use async_trait::async_trait;
use ferry_common::{FerryError, Result};
use futures::stream::{self, BoxStream, SelectAll, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Node name used when the context does not name this node.
pub const LOCAL_NODE: &str = "local";

/// Separator between partition column values in a routing key.
const KEY_SEPARATOR: char = '\u{1f}';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExchangeMode {
    /// Every node sends everything to the master.
    Gather,
    /// Like `Gather`, the master merges the pre-sorted node streams in order.
    SortGather,
    /// Whole batches are dealt round-robin across all nodes.
    Scatter,
    /// Every node sends everything to every node.
    Broadcast,
    /// Rows are routed to a node by the hash of their partition columns.
    Partition,
}

impl ExchangeMode {
    fn gathers(&self) -> bool {
        matches!(self, ExchangeMode::Gather | ExchangeMode::SortGather)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    uid: String,
    mode: ExchangeMode,
    #[serde(default)]
    sorting_cols: Vec<SortingCol>,
    #[serde(default)]
    partition_cols: Vec<usize>,
    #[serde(skip)]
    inited: bool,
}

impl Exchange {
    fn new(mode: ExchangeMode) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            mode,
            sorting_cols: Vec::new(),
            partition_cols: Vec::new(),
            inited: false,
        }
    }

    pub fn gather() -> Self {
        Self::new(ExchangeMode::Gather)
    }

    /// Gather whose output is globally ordered on `sorting_cols`. Each node's
    /// input must already be sorted on the same columns.
    pub fn sort_gather(sorting_cols: Vec<SortingCol>) -> Self {
        Self {
            sorting_cols,
            ..Self::new(ExchangeMode::SortGather)
        }
    }

    pub fn scatter() -> Self {
        Self::new(ExchangeMode::Scatter)
    }

    pub fn broadcast() -> Self {
        Self::new(ExchangeMode::Broadcast)
    }

    /// Route every row by the values of `partition_cols`, so that equal keys
    /// land on the same node.
    pub fn partition(partition_cols: Vec<usize>) -> Self {
        Self {
            partition_cols,
            ..Self::new(ExchangeMode::Partition)
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn mode(&self) -> &ExchangeMode {
        &self.mode
    }

    /// Open the connections of this run.
    async fn open(&mut self, ctx: &ExecutionContext) -> Result<Session> {
        if self.inited {
            // peers rendezvous on the uid, a second run would collide with the first
            return Err(FerryError::already_run(&self.uid));
        }
        self.inited = true;

        let mut session = Session::new(self.mode.clone(), self.partition_cols.clone(), ctx);
        if let Err(e) = session.connect(ctx, &self.uid).await {
            if let Err(close_err) = session.close().await {
                warn!("Exchange {} failed to close after init error: {}", self.uid, close_err);
            }
            return Err(e);
        }
        Ok(session)
    }
}

#[async_trait]
#[typetag::serde(name = "exchange")]
impl Runner for Exchange {
    fn returns(&self) -> Vec<TypeRef> {
        vec![wildcard()]
    }

    async fn run(
        &mut self,
        ctx: &ExecutionContext,
        mut input: Receiver<Dataset>,
        output: Sender<Dataset>,
    ) -> Result<()> {
        let mut session = self.open(ctx).await?;
        let mut inbound = Inbound::new(
            &self.mode,
            std::mem::take(&mut session.decoders),
            self.sorting_cols.clone(),
            ctx.config().merge_batch_size,
        );

        let outcome = {
            let send = session.send_all(&mut input);
            let recv = receive(&mut inbound, output);
            tokio::select! {
                res = futures::future::try_join(send, recv) => res.map(|_| ()),
                _ = ctx.cancelled() => Err(FerryError::Cancelled),
            }
        };

        // peers may still be sending to us; the connections stay open until
        // every source has signalled end of stream
        let timeout = session.shutdown_timeout;
        let uid = &self.uid;
        let drain = async {
            if inbound.is_finished() {
                return;
            }
            match tokio::time::timeout(timeout, inbound.drain()).await {
                Ok(()) => debug!("Exchange {} drained its sources", uid),
                Err(_) => warn!(
                    "Exchange {} timed out after {:?} waiting for sources to finish",
                    uid, timeout
                ),
            }
        };
        if session.eof_sent {
            drain.await;
        } else {
            // a full pipe to a peer only empties while we read from it
            tokio::join!(session.send_eof(), drain);
        }

        let outcome = match outcome {
            Err(e) if e.is_cancellation() => {
                debug!("Exchange {} cancelled", self.uid);
                Ok(())
            }
            other => other,
        };

        let closed = session.close().await;
        match (outcome, closed) {
            (Ok(()), Err(e)) => Err(e),
            (outcome, _) => outcome,
        }
    }
}

struct Destination {
    addr: String,
    encoder: Box<dyn EnvelopeEncoder>,
}

/// Connections, routing state and decoders of one run.
struct Session {
    mode: ExchangeMode,
    partition_cols: Vec<usize>,
    destinations: Vec<Destination>,
    by_addr: HashMap<String, usize>,
    ring: HashRing,
    decoders: Vec<(String, Box<dyn EnvelopeDecoder>)>,
    /// Write halves of connections dialed only to receive.
    idle: Vec<Destination>,
    next_scatter: usize,
    eof_sent: bool,
    max_frame_length: usize,
    short_circuit_capacity: usize,
    shutdown_timeout: Duration,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("mode", &self.mode)
            .field(
                "destinations",
                &self.destinations.iter().map(|d| &d.addr).collect::<Vec<_>>(),
            )
            .field("sources", &self.decoders.len())
            .finish()
    }
}

impl Session {
    fn new(mode: ExchangeMode, partition_cols: Vec<usize>, ctx: &ExecutionContext) -> Self {
        let config = ctx.config();
        Self {
            mode,
            partition_cols,
            destinations: Vec::new(),
            by_addr: HashMap::new(),
            ring: HashRing::new(config.virtual_nodes),
            decoders: Vec::new(),
            idle: Vec::new(),
            next_scatter: 0,
            eof_sent: false,
            max_frame_length: config.max_frame_length,
            short_circuit_capacity: config.short_circuit_capacity,
            shutdown_timeout: config.shutdown_timeout(),
        }
    }

    async fn connect(&mut self, ctx: &ExecutionContext, uid: &str) -> Result<()> {
        let this_node = ctx.this_node().unwrap_or(LOCAL_NODE).to_string();
        let dialer = ctx.dialer().cloned();

        // without a dialer the exchange runs on this node alone
        let (all_nodes, master) = match &dialer {
            Some(_) => {
                let nodes = match ctx.all_nodes() {
                    Some(nodes) if !nodes.is_empty() => nodes.to_vec(),
                    _ => vec![this_node.clone()],
                };
                let master = ctx.master_node().unwrap_or(this_node.as_str()).to_string();
                (nodes, master)
            }
            None => (vec![this_node.clone()], this_node.clone()),
        };

        let targets = if self.mode.gathers() {
            vec![master]
        } else {
            all_nodes.clone()
        };

        info!(
            "Exchange {} ({:?}) on {}: {} node(s), sending to {:?}",
            uid,
            self.mode,
            this_node,
            all_nodes.len(),
            targets
        );

        let mut readers = HashMap::new();
        let mut loopback = None;
        for node in &targets {
            let encoder: Box<dyn EnvelopeEncoder> = if *node == this_node {
                let (tx, rx) = short_circuit::channel(self.short_circuit_capacity);
                loopback = Some(rx);
                Box::new(tx)
            } else {
                let (encoder, decoder) =
                    dial(dialer.as_deref(), node, uid, self.max_frame_length).await?;
                readers.insert(node.clone(), decoder);
                Box::new(encoder)
            };
            self.by_addr.insert(node.clone(), self.destinations.len());
            self.destinations.push(Destination {
                addr: node.clone(),
                encoder,
            });
            self.ring.add(node.clone());
        }

        // only a target receives, and then from every node
        let Some(loopback) = loopback else {
            return Ok(());
        };
        let mut loopback = Some(loopback);
        for node in &all_nodes {
            let decoder: Box<dyn EnvelopeDecoder> = if *node == this_node {
                match loopback.take() {
                    Some(rx) => Box::new(rx),
                    None => continue,
                }
            } else if let Some(reader) = readers.remove(node) {
                // one connection serves both directions
                Box::new(reader)
            } else {
                let (encoder, decoder) =
                    dial(dialer.as_deref(), node, uid, self.max_frame_length).await?;
                self.idle.push(Destination {
                    addr: node.clone(),
                    encoder: Box::new(encoder),
                });
                Box::new(decoder)
            };
            self.decoders.push((node.clone(), decoder));
        }
        if let Some(rx) = loopback {
            let decoder: Box<dyn EnvelopeDecoder> = Box::new(rx);
            self.decoders.push((this_node, decoder));
        }
        Ok(())
    }

    /// Route every input dataset, then signal end of stream.
    async fn send_all(&mut self, input: &mut Receiver<Dataset>) -> Result<()> {
        while let Some(data) = input.recv().await {
            self.send(data).await?;
        }
        if let Err(e) = self.encode_all(&Envelope::eof()).await {
            warn!("Failed to deliver end of stream: {}", e);
        }
        self.eof_sent = true;
        Ok(())
    }

    async fn send(&mut self, data: Dataset) -> Result<()> {
        match self.mode {
            ExchangeMode::Scatter => {
                let n = self.destinations.len();
                let dest = &mut self.destinations[self.next_scatter % n];
                self.next_scatter = self.next_scatter.wrapping_add(1);
                dest.encoder.encode(&Envelope::Payload(data)).await
            }
            ExchangeMode::Partition => self.send_partitioned(data).await,
            _ => self.encode_all(&Envelope::Payload(data)).await,
        }
    }

    async fn send_partitioned(&mut self, data: Dataset) -> Result<()> {
        let groups = self.route(&data)?;
        if groups.len() == 1 {
            if let Some((&dest, _)) = groups.iter().next() {
                return self.destinations[dest]
                    .encoder
                    .encode(&Envelope::Payload(data))
                    .await;
            }
        }
        for (dest, rows) in groups {
            let part = data.select_rows(&rows)?;
            self.destinations[dest]
                .encoder
                .encode(&Envelope::Payload(part))
                .await?;
        }
        Ok(())
    }

    /// Group row indexes by destination.
    fn route(&self, data: &Dataset) -> Result<BTreeMap<usize, Vec<usize>>> {
        let rendered = self
            .partition_cols
            .iter()
            .map(|&c| {
                data.column(c).map(|col| col.keys()).ok_or_else(|| {
                    FerryError::invalid_data(format!(
                        "partition column {} out of range for width {}",
                        c,
                        data.width()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let sep = KEY_SEPARATOR.to_string();
        for row in 0..data.len() {
            let key = rendered
                .iter()
                .map(|col| col[row].as_str())
                .collect::<Vec<_>>()
                .join(&sep);
            let dest = self
                .ring
                .get(&key)
                .and_then(|addr| self.by_addr.get(addr))
                .copied()
                .ok_or_else(|| FerryError::transport_error("no destination for partition key"))?;
            groups.entry(dest).or_default().push(row);
        }
        Ok(groups)
    }

    /// Encode to every destination. All are attempted; the first error wins.
    async fn encode_all(&mut self, envelope: &Envelope) -> Result<()> {
        let mut first = None;
        for dest in &mut self.destinations {
            if let Err(e) = dest.encoder.encode(envelope).await {
                debug!("Encode to {} failed: {}", dest.addr, e);
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    /// Best-effort end of stream after an early exit.
    async fn send_eof(&mut self) {
        let timeout = self.shutdown_timeout;
        match tokio::time::timeout(timeout, self.encode_all(&Envelope::eof())).await {
            Ok(Ok(())) => debug!("Sent end of stream after early exit"),
            Ok(Err(e)) => warn!("Failed to deliver end of stream: {}", e),
            Err(_) => warn!("Timed out after {:?} delivering end of stream", timeout),
        }
        self.eof_sent = true;
    }

    async fn close(&mut self) -> Result<()> {
        let timeout = self.shutdown_timeout;
        let mut first = None;
        for dest in self.destinations.iter_mut().chain(self.idle.iter_mut()) {
            let err = match tokio::time::timeout(timeout, dest.encoder.close()).await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(_) => FerryError::transport_error(format!(
                    "timed out closing connection to {}",
                    dest.addr
                )),
            };
            warn!("Failed to close connection to {}: {}", dest.addr, err);
            first.get_or_insert(err);
        }
        first.map_or(Ok(()), Err)
    }
}

async fn dial(
    dialer: Option<&dyn Dialer>,
    node: &str,
    uid: &str,
    max_frame_length: usize,
) -> Result<(transport::FramedEnvelopeEncoder, transport::FramedEnvelopeDecoder)> {
    let dialer = dialer
        .ok_or_else(|| FerryError::transport_error(format!("no dialer to reach {}", node)))?;
    debug!("Dialing {} for exchange {}", node, uid);
    let conn = dialer.connect(node, uid).await?;
    Ok(transport::framed(conn, node, max_frame_length))
}

type SourceStream = BoxStream<'static, Result<Dataset>>;

fn source_stream(peer: String, decoder: Box<dyn EnvelopeDecoder>) -> SourceStream {
    stream::unfold(Some((peer, decoder)), |state| async move {
        let (peer, mut decoder) = state?;
        match decoder.decode().await {
            Ok(Some(data)) => Some((Ok(data), Some((peer, decoder)))),
            Ok(None) => {
                debug!("Source {} reached end of stream", peer);
                None
            }
            Err(e) => Some((Err(e), None)),
        }
    })
    .boxed()
}

/// Every source of a run, merged in arrival order or in sort order.
enum Inbound {
    Arrival(SelectAll<SourceStream>),
    Sorted(SortedMerge),
}

impl Inbound {
    fn new(
        mode: &ExchangeMode,
        decoders: Vec<(String, Box<dyn EnvelopeDecoder>)>,
        sorting_cols: Vec<SortingCol>,
        batch_size: usize,
    ) -> Self {
        if *mode == ExchangeMode::SortGather {
            Inbound::Sorted(SortedMerge::new(
                decoders.into_iter().map(|(_, decoder)| decoder).collect(),
                sorting_cols,
                batch_size,
            ))
        } else {
            Inbound::Arrival(stream::select_all(
                decoders
                    .into_iter()
                    .map(|(peer, decoder)| source_stream(peer, decoder)),
            ))
        }
    }

    async fn next(&mut self) -> Result<Option<Dataset>> {
        match self {
            Inbound::Arrival(merged) => merged.next().await.transpose(),
            Inbound::Sorted(merge) => merge.next_batch().await,
        }
    }

    /// Whether every source has reached end of stream.
    fn is_finished(&self) -> bool {
        match self {
            Inbound::Arrival(merged) => merged.is_empty(),
            Inbound::Sorted(merge) => merge.is_finished(),
        }
    }

    /// Read and discard until every source has ended.
    async fn drain(&mut self) {
        match self {
            Inbound::Arrival(merged) => {
                while let Some(item) = merged.next().await {
                    if let Err(e) = item {
                        debug!("Source failed while draining: {}", e);
                    }
                }
            }
            Inbound::Sorted(merge) => merge.drain().await,
        }
    }
}

/// Forward inbound datasets until every source reached end of stream.
async fn receive(inbound: &mut Inbound, output: Sender<Dataset>) -> Result<()> {
    let mut output = Some(output);
    while let Some(data) = inbound.next().await? {
        forward(&mut output, data).await;
    }
    Ok(())
}

/// Once the consumer is gone, keep draining so senders are never blocked.
async fn forward(output: &mut Option<Sender<Dataset>>, data: Dataset) {
    if let Some(tx) = output {
        if tx.send(data).await.is_err() {
            debug!("Exchange output closed, discarding inbound data");
            *output = None;
        }
    }
}
