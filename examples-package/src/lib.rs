//! Runnable demos of the split and scatter stage.
//!
//! Run with `cargo run -p restore-examples --example split_and_scatter`.
