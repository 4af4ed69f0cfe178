//! Split and scatter stage configuration

use restore_core::{RestoreError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the split and scatter stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScatterConfig {
    /// Number of workers splitting and scattering entries concurrently
    pub workers: usize,
    /// How long a split is kept before the cluster may merge it away
    #[serde(rename = "split_expiration_secs", with = "duration_secs")]
    pub split_expiration: Duration,
}

impl Default for ScatterConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            split_expiration: Duration::from_secs(3600), // 1 hour
        }
    }
}

impl ScatterConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    /// Set the number of scatter workers
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the split expiration
    pub fn with_split_expiration(mut self, expiration: Duration) -> Self {
        self.split_expiration = expiration;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RestoreError::InvalidConfig(
                "at least one scatter worker is required".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
