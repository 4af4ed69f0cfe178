//! Split and scatter example
//!
//! Pre-splits a small restore against an in-process three node cluster,
//! then shows what happens when a scatter fails and when a split fails.

use restore_core::{Chunk, Key, NodeId, Rekey, RestoreSpanEntry, Span, SplitAndScatterSpec};
use restore_scatter::{
    node_for_routing_key, rows_to_batch, DbScatterer, LocalCluster, ProcessorId, RoutedRow,
    RowSource, ScatterConfig, SplitAndScatterProcessor,
};
use std::sync::Arc;

fn build_spec() -> SplitAndScatterSpec {
    let chunk = |table: &str, keys: &[&str]| {
        Chunk::new(
            keys.iter()
                .enumerate()
                .map(|(i, k)| {
                    let start = Key::from(format!("/backup/{table}/{k}").as_str());
                    let end = start.next();
                    RestoreSpanEntry::new(Span::new(start, end))
                        .with_file(format!("{table}/{k}.sst"))
                        .with_progress_idx(i as u64)
                })
                .collect(),
        )
    };

    SplitAndScatterSpec::new(
        vec![
            chunk("orders", &["a", "c", "e"]),
            chunk("orders", &["g", "i"]),
            chunk("items", &["b", "d", "f", "h"]),
        ],
        vec![
            Rekey::new("/backup/orders/", "/t/104/"),
            Rekey::new("/backup/items/", "/t/105/"),
        ],
    )
}

async fn drain(processor: &mut SplitAndScatterProcessor) -> (Vec<RoutedRow>, Option<String>) {
    let mut rows = Vec::new();
    while let Some(row) = processor.next().await {
        match row {
            Ok(row) => rows.push(row),
            Err(err) => return (rows, Some(err.to_string())),
        }
    }
    (rows, None)
}

fn describe(rows: &[RoutedRow]) -> restore_core::Result<()> {
    for row in rows {
        let entry = row.decode_entry()?;
        let node = node_for_routing_key(&row.routing_key).unwrap_or(NodeId::UNKNOWN);
        println!("   {:<4} {}", node.to_string(), entry.span);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> restore_core::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("restore_scatter=info")
        .init();

    println!("=== Split and Scatter Demo ===\n");

    println!("1. Scattering 9 entries over 3 nodes...");
    let cluster = Arc::new(LocalCluster::with_node_count(3));
    let config = ScatterConfig::default().with_workers(3);
    let scatterer = Arc::new(DbScatterer::new(cluster.clone(), config.split_expiration));
    let mut processor =
        SplitAndScatterProcessor::new(ProcessorId::new(), build_spec(), scatterer, config.clone())?;
    processor.start();
    let (rows, err) = drain(&mut processor).await;
    describe(&rows)?;
    println!(
        "   {} rows, {} distinct destinations, error: {:?}",
        rows.len(),
        processor.routing_cache_len(),
        err
    );
    println!("   Leases per node: {:?}\n", cluster.lease_counts());

    println!("2. Packing rows into an Arrow batch...");
    let batch = rows_to_batch(&rows)?;
    println!(
        "   {} rows x {} columns: {:?}\n",
        batch.num_rows(),
        batch.num_columns(),
        batch
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect::<Vec<_>>()
    );

    println!("3. A failed scatter keeps the entry on the unknown node...");
    let cluster = Arc::new(LocalCluster::with_node_count(3));
    cluster.fail_scatter_at("/t/104/c");
    let scatterer = Arc::new(DbScatterer::new(cluster.clone(), config.split_expiration));
    let mut processor =
        SplitAndScatterProcessor::new(ProcessorId::new(), build_spec(), scatterer, config.clone())?;
    processor.start();
    let (rows, err) = drain(&mut processor).await;
    let unknown = rows
        .iter()
        .filter(|r| node_for_routing_key(&r.routing_key) == Some(NodeId::UNKNOWN))
        .count();
    println!(
        "   {} rows, {} routed to the unknown node, error: {:?}\n",
        rows.len(),
        unknown,
        err
    );

    println!("4. A failed split stops the stage...");
    let cluster = Arc::new(LocalCluster::with_node_count(3));
    cluster.fail_split_at("/t/105/b");
    let scatterer = Arc::new(DbScatterer::new(cluster.clone(), config.split_expiration));
    let mut processor = SplitAndScatterProcessor::new(
        ProcessorId::new(),
        build_spec(),
        scatterer,
        config.with_workers(1),
    )?;
    processor.start();
    let (rows, err) = drain(&mut processor).await;
    println!("   {} rows before the failure", rows.len());
    println!("   error: {}", err.unwrap_or_default());
    processor.close();
    println!("   processor state after close: {}", processor.state());

    println!("\n=== Demo Complete ===");
    Ok(())
}
