//! Range administration primitives of the storage cluster
//!
//! The split and scatter stage only needs three operations from the
//! cluster: a clock, a split at a key, and a scatter of a span. They are
//! modelled as a trait so the stage can run against a real cluster client
//! or the in-process [`LocalCluster`](crate::cluster::LocalCluster).

use async_trait::async_trait;
use restore_core::{Key, NodeId, Span, Timestamp};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by the cluster for a single admin request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    /// The range or its leaseholder could not be reached
    #[error("Range unavailable: {0}")]
    Unavailable(String),

    /// The cluster refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The request was abandoned before it completed
    #[error("Request cancelled")]
    Cancelled,
}

/// Scatter the ranges of a span across the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminScatterRequest {
    pub span: Span,
    /// Let the cluster move existing leases freely instead of placing only
    /// the scattered range
    pub randomize_leases: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaDescriptor {
    pub node_id: NodeId,
    pub store_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub replica: ReplicaDescriptor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    pub range_id: u64,
    pub start_key: Key,
    pub end_key: Key,
}

/// Placement of one scattered range
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeInfo {
    pub desc: RangeDescriptor,
    /// Missing when the lease was not yet acquired after the move
    pub lease: Option<Lease>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminScatterResponse {
    /// One record per scattered range. Older cluster versions leave this
    /// empty.
    pub range_infos: Vec<RangeInfo>,
}

/// Range split and scatter operations offered by the storage cluster
#[async_trait]
pub trait RangeAdmin: Send + Sync {
    /// Current cluster time
    fn clock_now(&self) -> Timestamp;

    /// Split the range containing `key` so that a new range starts at `key`.
    /// The split may be merged away after `expiration`.
    async fn admin_split(&self, key: &Key, expiration: Timestamp) -> Result<(), AdminError>;

    /// Relocate the ranges of the requested span
    async fn admin_scatter(
        &self,
        req: AdminScatterRequest,
    ) -> Result<AdminScatterResponse, AdminError>;
}
