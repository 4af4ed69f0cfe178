//! Core types for the restore split-and-scatter stage
//!
//! This crate holds the data model shared by the restore pipeline: keys and
//! spans, the restore work units (entries and chunks), the key rewriter
//! that maps backup-time keys into the restore keyspace, and the error type.

pub mod error;
pub mod rewrite;
pub mod schema;
pub mod types;

pub use error::{RestoreError, Result};
pub use rewrite::{KeyRewriter, Rekey};
pub use schema::{output_schema, ENTRY_COLUMN, ROUTING_KEY_COLUMN};
pub use types::*;
