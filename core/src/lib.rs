//! Ferry Core - streaming exchange layer of a distributed columnar dataflow engine
//!
//! Runners stream typed row batches ([`Dataset`]s) to each other. The
//! [`Exchange`] runner moves batches between the nodes of a cluster and
//! [`Union`] fans one stream out to several runners and back in.

pub mod context;
pub mod data;
pub mod dataset;
pub mod exchange;
pub mod runner;
pub mod union;

pub use context::ExecutionContext;
pub use data::{Column, Comparison, Data, DataRef, Type, TypeRef, TypeRegistry};
pub use dataset::Dataset;
pub use exchange::{
    Connection, Dialer, Envelope, Exchange, ExchangeMode, MemoryNetwork, SortingCol,
};
pub use runner::{PassThrough, Runner, run_runner};
pub use union::Union;
