//! Split and scatter of a single key
//!
//! The stage places ranges through a [`Scatterer`]. [`DbScatterer`] issues
//! the split and scatter requests against the cluster; [`NoopScatterer`] is
//! used when the executing tenant does not own the keyspace and always
//! reports an unknown destination, which the downstream router sends to its
//! default stream.

use crate::admin::{AdminScatterRequest, AdminScatterResponse, RangeAdmin};
use crate::config::ScatterConfig;
use async_trait::async_trait;
use restore_core::{Key, KeyRewriter, NodeId, RestoreError, Result, Span, TenantScope};
use std::sync::Arc;
use std::time::Duration;

/// Splits the keyspace at a key and scatters the resulting range
#[async_trait]
pub trait Scatterer: Send + Sync {
    /// Rewrite `key` into the restore keyspace, split there and scatter the
    /// new range. Returns the node now holding the range's lease, or
    /// [`NodeId::UNKNOWN`] when it could not be determined.
    ///
    /// Only rewrite and split failures are errors. A failed scatter costs
    /// balance, not correctness, and is reported as an unknown destination.
    async fn split_and_scatter_key(
        &self,
        kr: &KeyRewriter,
        key: &Key,
        randomize_leases: bool,
    ) -> Result<NodeId>;
}

/// Scatterer for contexts that may not split or scatter ranges
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScatterer;

#[async_trait]
impl Scatterer for NoopScatterer {
    async fn split_and_scatter_key(
        &self,
        _kr: &KeyRewriter,
        _key: &Key,
        _randomize_leases: bool,
    ) -> Result<NodeId> {
        Ok(NodeId::UNKNOWN)
    }
}

/// Scatterer issuing admin requests to the cluster
pub struct DbScatterer {
    admin: Arc<dyn RangeAdmin>,
    split_expiration: Duration,
}

impl DbScatterer {
    pub fn new(admin: Arc<dyn RangeAdmin>, split_expiration: Duration) -> Self {
        Self {
            admin,
            split_expiration,
        }
    }

    /// Node holding the lease of the first scattered range. One range info is
    /// returned per scattered range, and the first one contains the split key.
    pub fn find_destination(res: &AdminScatterResponse) -> NodeId {
        res.range_infos
            .first()
            .and_then(|info| info.lease)
            .map(|lease| lease.replica.node_id)
            .unwrap_or(NodeId::UNKNOWN)
    }
}

#[async_trait]
impl Scatterer for DbScatterer {
    async fn split_and_scatter_key(
        &self,
        kr: &KeyRewriter,
        key: &Key,
        randomize_leases: bool,
    ) -> Result<NodeId> {
        let expiration = self.admin.clock_now().add(self.split_expiration);
        let new_key = kr.rewrite_key(key)?;

        tracing::debug!(key = %new_key, "presplitting new key");
        self.admin
            .admin_split(&new_key, expiration)
            .await
            .map_err(|e| RestoreError::Split {
                key: new_key.to_string(),
                source: Box::new(e),
            })?;

        tracing::debug!(key = %new_key, randomize_leases, "scattering new key");
        let span = Span::single_key(&new_key);
        let req = AdminScatterRequest {
            span: span.clone(),
            randomize_leases,
        };

        match self.admin.admin_scatter(req).await {
            Ok(res) => Ok(Self::find_destination(&res)),
            Err(err) => {
                tracing::error!(%span, error = %err, "failed to scatter span");
                Ok(NodeId::UNKNOWN)
            }
        }
    }
}

/// Pick the scatterer for the executing tenant
pub fn scatterer_for_tenant(
    scope: TenantScope,
    admin: Arc<dyn RangeAdmin>,
    config: &ScatterConfig,
) -> Arc<dyn Scatterer> {
    if scope.owns_keyspace() {
        Arc::new(DbScatterer::new(admin, config.split_expiration))
    } else {
        Arc::new(NoopScatterer)
    }
}
