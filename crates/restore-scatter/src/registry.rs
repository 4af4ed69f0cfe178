//! Registry of processor constructors
//!
//! The pipeline builder owns a registry keyed by processor kind and looks up
//! constructors in it when planning a restore, instead of relying on
//! process-wide registration.

use crate::admin::RangeAdmin;
use crate::config::ScatterConfig;
use crate::processor::{RowSource, SplitAndScatterProcessor};
use crate::scatterer::scatterer_for_tenant;
use crate::types::ProcessorId;
use restore_core::{RestoreError, Result, SplitAndScatterSpec, TenantScope};
use std::collections::HashMap;
use std::sync::Arc;

/// Kind name of the split and scatter processor
pub const SPLIT_AND_SCATTER: &str = "split_and_scatter";

/// Everything a processor constructor may need
pub struct ProcessorArgs {
    pub processor_id: ProcessorId,
    pub spec: SplitAndScatterSpec,
    pub tenant: TenantScope,
    pub admin: Arc<dyn RangeAdmin>,
    pub config: ScatterConfig,
}

pub type ProcessorConstructor =
    Arc<dyn Fn(ProcessorArgs) -> Result<Box<dyn RowSource>> + Send + Sync>;

/// Map of processor kind to constructor
#[derive(Default, Clone)]
pub struct ProcessorRegistry {
    constructors: HashMap<String, ProcessorConstructor>,
}

impl ProcessorRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the built-in processors
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SPLIT_AND_SCATTER, Arc::new(new_split_and_scatter_processor));
        registry
    }

    /// Register a constructor, replacing any previous one for `kind`
    pub fn register(&mut self, kind: &str, constructor: ProcessorConstructor) {
        self.constructors.insert(kind.to_lowercase(), constructor);
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.constructors.contains_key(&kind.to_lowercase())
    }

    /// Get all registered kinds
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(|s| s.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Build a processor of the given kind
    pub fn create(&self, kind: &str, args: ProcessorArgs) -> Result<Box<dyn RowSource>> {
        let constructor = self
            .constructors
            .get(&kind.to_lowercase())
            .ok_or_else(|| RestoreError::UnknownProcessor(kind.to_string()))?;
        constructor(args)
    }
}

fn new_split_and_scatter_processor(args: ProcessorArgs) -> Result<Box<dyn RowSource>> {
    let scatterer = scatterer_for_tenant(args.tenant, args.admin, &args.config);
    let processor =
        SplitAndScatterProcessor::new(args.processor_id, args.spec, scatterer, args.config)?;
    Ok(Box::new(processor))
}
