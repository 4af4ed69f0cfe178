//! Core types for the split and scatter stage

use restore_core::{NodeId, RestoreSpanEntry};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a processor instance, used in log output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessorId(pub Uuid);

impl ProcessorId {
    /// Create a new random processor ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proc-{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle of a split and scatter processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// Created, background work not started
    Idle,
    /// Background work running, rows are being emitted
    Running,
    /// Output is finished; only end-of-stream signals remain
    Draining,
    /// Background work cancelled and released
    Closed,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorState::Idle => write!(f, "Idle"),
            ProcessorState::Running => write!(f, "Running"),
            ProcessorState::Draining => write!(f, "Draining"),
            ProcessorState::Closed => write!(f, "Closed"),
        }
    }
}

/// An entry whose split and scatter completed, with its destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryNode {
    pub entry: RestoreSpanEntry,
    pub node: NodeId,
}
