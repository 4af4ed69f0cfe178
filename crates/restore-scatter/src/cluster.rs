//! In-process cluster for running the stage without a storage cluster
//!
//! `LocalCluster` keeps a sorted map of range boundaries and the node that
//! holds each range's lease. Splits add boundaries, scatters move leases.
//! It also supports injecting split and scatter failures.

use crate::admin::{
    AdminError, AdminScatterRequest, AdminScatterResponse, Lease, RangeAdmin, RangeDescriptor,
    RangeInfo, ReplicaDescriptor,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use restore_core::{Key, NodeId, Timestamp};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct RangeState {
    range_id: u64,
    leaseholder: NodeId,
    expiration: Option<Timestamp>,
}

/// A simulated cluster implementing [`RangeAdmin`]
pub struct LocalCluster {
    /// Member nodes
    nodes: Vec<NodeId>,
    /// Range start key -> range state
    ranges: RwLock<BTreeMap<Key, RangeState>>,
    /// Number of leases held per node
    lease_counts: DashMap<NodeId, usize>,
    next_range_id: AtomicU64,
    split_calls: AtomicU64,
    scatter_calls: AtomicU64,
    failing_splits: RwLock<HashSet<Key>>,
    failing_scatters: RwLock<HashSet<Key>>,
    /// Reply to scatters without range infos, like an older cluster version
    legacy_responses: AtomicBool,
    latency: RwLock<Option<Duration>>,
}

impl LocalCluster {
    /// Create a cluster with the given members. The whole keyspace starts as
    /// one range led by the first node.
    pub fn new(nodes: Vec<NodeId>) -> Self {
        let first = nodes.first().copied().unwrap_or(NodeId::UNKNOWN);
        let mut ranges = BTreeMap::new();
        ranges.insert(
            Key::default(),
            RangeState {
                range_id: 1,
                leaseholder: first,
                expiration: None,
            },
        );

        let lease_counts = DashMap::new();
        for node in &nodes {
            lease_counts.insert(*node, 0);
        }
        if !first.is_unknown() {
            lease_counts.insert(first, 1);
        }

        Self {
            nodes,
            ranges: RwLock::new(ranges),
            lease_counts,
            next_range_id: AtomicU64::new(2),
            split_calls: AtomicU64::new(0),
            scatter_calls: AtomicU64::new(0),
            failing_splits: RwLock::new(HashSet::new()),
            failing_scatters: RwLock::new(HashSet::new()),
            legacy_responses: AtomicBool::new(false),
            latency: RwLock::new(None),
        }
    }

    /// Create a cluster with nodes `1..=count`
    pub fn with_node_count(count: u32) -> Self {
        Self::new((1..=count).map(NodeId).collect())
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Make every split at `key` fail
    pub fn fail_split_at(&self, key: impl Into<Key>) {
        self.failing_splits.write().insert(key.into());
    }

    /// Make every scatter of a span starting at `key` fail
    pub fn fail_scatter_at(&self, key: impl Into<Key>) {
        self.failing_scatters.write().insert(key.into());
    }

    pub fn set_legacy_responses(&self, legacy: bool) {
        self.legacy_responses.store(legacy, Ordering::SeqCst);
    }

    /// Delay every admin request by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write() = latency;
    }

    pub fn split_count(&self) -> u64 {
        self.split_calls.load(Ordering::SeqCst)
    }

    pub fn scatter_count(&self) -> u64 {
        self.scatter_calls.load(Ordering::SeqCst)
    }

    pub fn range_count(&self) -> usize {
        self.ranges.read().len()
    }

    /// Leases held per node, sorted by node id
    pub fn lease_counts(&self) -> Vec<(NodeId, usize)> {
        let mut counts: Vec<(NodeId, usize)> = self
            .lease_counts
            .iter()
            .map(|r| (*r.key(), *r.value()))
            .collect();
        counts.sort();
        counts
    }

    /// Node holding the lease of the range containing `key`
    pub fn leaseholder(&self, key: &Key) -> Option<NodeId> {
        let ranges = self.ranges.read();
        ranges
            .range(..=key.clone())
            .next_back()
            .map(|(_, r)| r.leaseholder)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn pick_node(&self, key: &Key, randomize_leases: bool, call: u64) -> Option<NodeId> {
        if self.nodes.is_empty() {
            return None;
        }
        if randomize_leases {
            let hasher = ahash::RandomState::with_seeds(0x5eed, 0xc0ff, 0xee00, 0x1234);
            let idx = hasher.hash_one((key.as_bytes(), call)) as usize % self.nodes.len();
            return Some(self.nodes[idx]);
        }
        self.nodes
            .iter()
            .copied()
            .min_by_key(|n| (self.lease_counts.get(n).map(|c| *c).unwrap_or(0), *n))
    }

    fn move_lease(&self, from: NodeId, to: NodeId) {
        if from == to {
            return;
        }
        if let Some(mut count) = self.lease_counts.get_mut(&from) {
            *count = count.saturating_sub(1);
        }
        *self.lease_counts.entry(to).or_insert(0) += 1;
    }
}

#[async_trait]
impl RangeAdmin for LocalCluster {
    fn clock_now(&self) -> Timestamp {
        Timestamp::now()
    }

    async fn admin_split(&self, key: &Key, expiration: Timestamp) -> Result<(), AdminError> {
        self.simulate_latency().await;
        self.split_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_splits.read().contains(key) {
            return Err(AdminError::Rejected(format!("split at {} refused", key)));
        }

        let mut ranges = self.ranges.write();
        if let Some(existing) = ranges.get_mut(key) {
            existing.expiration = existing.expiration.max(Some(expiration));
            return Ok(());
        }

        let parent_holder = ranges
            .range(..key.clone())
            .next_back()
            .map(|(_, r)| r.leaseholder)
            .unwrap_or(NodeId::UNKNOWN);
        let range_id = self.next_range_id.fetch_add(1, Ordering::SeqCst);
        ranges.insert(
            key.clone(),
            RangeState {
                range_id,
                leaseholder: parent_holder,
                expiration: Some(expiration),
            },
        );
        drop(ranges);

        if !parent_holder.is_unknown() {
            *self.lease_counts.entry(parent_holder).or_insert(0) += 1;
        }
        tracing::trace!(%key, range_id, "split range");
        Ok(())
    }

    async fn admin_scatter(
        &self,
        req: AdminScatterRequest,
    ) -> Result<AdminScatterResponse, AdminError> {
        self.simulate_latency().await;
        let call = self.scatter_calls.fetch_add(1, Ordering::SeqCst);

        let key = &req.span.key;
        if self.failing_scatters.read().contains(key) {
            return Err(AdminError::Unavailable(format!(
                "scatter of {} timed out",
                req.span
            )));
        }

        let target = self
            .pick_node(key, req.randomize_leases, call)
            .ok_or_else(|| AdminError::Unavailable("cluster has no nodes".to_string()))?;

        let (desc, previous) = {
            let mut ranges = self.ranges.write();
            let end_key = ranges
                .range((
                    std::ops::Bound::Excluded(key.clone()),
                    std::ops::Bound::Unbounded,
                ))
                .next()
                .map(|(k, _)| k.clone())
                .unwrap_or_default();
            let (start_key, state) = ranges
                .range_mut(..=key.clone())
                .next_back()
                .ok_or_else(|| AdminError::Unavailable(format!("no range for {}", key)))?;
            let previous = state.leaseholder;
            state.leaseholder = target;
            (
                RangeDescriptor {
                    range_id: state.range_id,
                    start_key: start_key.clone(),
                    end_key,
                },
                previous,
            )
        };
        self.move_lease(previous, target);

        if self.legacy_responses.load(Ordering::SeqCst) {
            return Ok(AdminScatterResponse::default());
        }

        Ok(AdminScatterResponse {
            range_infos: vec![RangeInfo {
                desc,
                lease: Some(Lease {
                    replica: ReplicaDescriptor {
                        node_id: target,
                        store_id: target.0,
                    },
                }),
            }],
        })
    }
}
