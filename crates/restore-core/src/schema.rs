use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::sync::Arc;

/// Column carrying the routing key of the entry's destination node
pub const ROUTING_KEY_COLUMN: &str = "routing_key";

/// Column carrying the serialized restore span entry
pub const ENTRY_COLUMN: &str = "entry";

/// Schema of the rows emitted by the split and scatter stage
pub fn output_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(ROUTING_KEY_COLUMN, DataType::Binary, false),
        Field::new(ENTRY_COLUMN, DataType::Binary, false),
    ]))
}
