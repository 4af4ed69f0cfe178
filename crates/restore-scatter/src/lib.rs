//! Split and scatter stage for distributed restores
//!
//! Before bulk-loading restored data, the ranges it will land in are split
//! and scattered across the cluster so that the load is balanced. This
//! crate runs that placement and labels every restore entry with the node it
//! was scattered to, so a downstream router can send the entry to the worker
//! colocated with that node.
//!
//! # Architecture
//!
//! - **Scatterer**: splits at a key and scatters the resulting range
//! - **Feeder**: pre-splits each chunk at its first key, in order
//! - **Worker pool**: splits and scatters every entry concurrently
//! - **Processor**: pull interface over the completed entries
//! - **Routing**: per-node routing keys and the matching range router
//!
//! # Example
//!
//! ```ignore
//! use restore_scatter::{LocalCluster, ProcessorArgs, ProcessorRegistry, SPLIT_AND_SCATTER};
//!
//! let registry = ProcessorRegistry::with_defaults();
//! let mut source = registry.create(SPLIT_AND_SCATTER, args)?;
//! source.start();
//! while let Some(row) = source.next().await {
//!     route(row?);
//! }
//! ```
//!
//! # Modules
//!
//! - [`admin`]: cluster range administration interface
//! - [`cluster`]: in-process cluster
//! - [`config`]: stage configuration
//! - [`scatterer`]: split and scatter of a single key
//! - [`pipeline`]: feeder and worker pool
//! - [`routing`]: routing keys, cache and range router
//! - [`processor`]: the pull-based processor
//! - [`registry`]: processor constructors by kind

pub mod admin;
pub mod cluster;
pub mod config;
pub mod pipeline;
pub mod processor;
pub mod registry;
pub mod routing;
pub mod scatterer;
pub mod types;

// Re-exports
pub use admin::{
    AdminError, AdminScatterRequest, AdminScatterResponse, Lease, RangeAdmin, RangeDescriptor,
    RangeInfo, ReplicaDescriptor,
};
pub use cluster::LocalCluster;
pub use config::ScatterConfig;
pub use pipeline::run_split_and_scatter;
pub use processor::{row_stream, rows_to_batch, RoutedRow, RowSource, SplitAndScatterProcessor};
pub use registry::{ProcessorArgs, ProcessorConstructor, ProcessorRegistry, SPLIT_AND_SCATTER};
pub use routing::{
    encode_bytes_ascending, node_for_routing_key, routing_datums_for_node, routing_span_for_node,
    RangeRouter, RouterSpan, RoutingDatumCache,
};
pub use scatterer::{scatterer_for_tenant, DbScatterer, NoopScatterer, Scatterer};
pub use types::{EntryNode, ProcessorId, ProcessorState};
