use crate::config::{Config, OutputFormat};
use anyhow::{Context, Result};
use colored::Colorize;
use comfy_table::{Cell, Color, Table as ComfyTable};
use futures::TryStreamExt;
use restore_core::{
    Chunk, Key, NodeId, Rekey, RestoreSpanEntry, Span, SplitAndScatterSpec, TenantScope,
};
use restore_scatter::{
    node_for_routing_key, routing_span_for_node, row_stream, LocalCluster, ProcessorArgs,
    ProcessorId, ProcessorRegistry, RangeRouter, RoutedRow, SPLIT_AND_SCATTER,
};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

const SAMPLE_OLD_PREFIX: &str = "/backup/t53/";
const SAMPLE_NEW_PREFIX: &str = "/t104/";

pub async fn run_stage(
    spec_path: &Path,
    nodes: &[u32],
    tenant: TenantScope,
    config: &Config,
) -> Result<()> {
    let start = Instant::now();

    let spec = SplitAndScatterSpec::from_file(spec_path)
        .with_context(|| format!("Failed to load spec {:?}", spec_path))?;
    tracing::info!(path = ?spec_path, entries = spec.total_entries(), "loaded restore spec");
    println!(
        "{} Splitting and scattering {} entries in {} chunks across {} nodes",
        "→".bright_blue(),
        spec.total_entries(),
        spec.chunks.len(),
        nodes.len()
    );

    let node_ids: Vec<NodeId> = nodes.iter().copied().map(NodeId).collect();
    let cluster = Arc::new(LocalCluster::new(node_ids.clone()));

    let registry = ProcessorRegistry::with_defaults();
    let mut source = registry.create(
        SPLIT_AND_SCATTER,
        ProcessorArgs {
            processor_id: ProcessorId::new(),
            spec,
            tenant,
            admin: cluster.clone(),
            config: config.scatter.clone(),
        },
    )?;

    source.start();
    let rows: Vec<RoutedRow> = row_stream(source)
        .try_collect()
        .await
        .context("Split and scatter failed")?;
    tracing::debug!(rows = rows.len(), "split and scatter stream finished");

    let elapsed = start.elapsed();

    // Stream 0 is the local stream and takes rows with no known destination.
    let streams: Vec<(NodeId, usize)> = node_ids
        .iter()
        .enumerate()
        .map(|(i, node)| (*node, i))
        .collect();
    let router = RangeRouter::for_nodes(&streams, Some(0))?;

    if config.show_rows {
        match config.output_format {
            OutputFormat::Table => print_rows_table(&rows, &router)?,
            OutputFormat::Json => print_rows_json(&rows, &router)?,
        }
    }

    print_summary(&rows, &cluster);

    println!(
        "{} {} rows in {:.2}ms ({} splits, {} scatters)",
        "✓".bright_green(),
        rows.len(),
        elapsed.as_secs_f64() * 1000.0,
        cluster.split_count(),
        cluster.scatter_count()
    );

    Ok(())
}

fn node_label(row: &RoutedRow) -> String {
    match node_for_routing_key(&row.routing_key) {
        Some(node) if node.is_unknown() => "unknown".to_string(),
        Some(node) => node.to_string(),
        None => "?".to_string(),
    }
}

fn print_rows_table(rows: &[RoutedRow], router: &RangeRouter) -> Result<()> {
    let mut table = ComfyTable::new();
    table.set_header(vec![
        Cell::new("Node").fg(Color::Cyan),
        Cell::new("Stream").fg(Color::Yellow),
        Cell::new("Span").fg(Color::Green),
        Cell::new("Files").fg(Color::Magenta),
        Cell::new("Bytes").fg(Color::Blue),
    ]);

    for row in rows {
        let entry = row.decode_entry()?;
        let stream = router
            .route(&row.routing_key)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            node_label(row),
            stream,
            entry.span.to_string(),
            entry.files.len().to_string(),
            row.entry_bytes.len().to_string(),
        ]);
    }

    println!("{table}");
    Ok(())
}

fn print_rows_json(rows: &[RoutedRow], router: &RangeRouter) -> Result<()> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let entry = row.decode_entry()?;
        out.push(serde_json::json!({
            "node": node_for_routing_key(&row.routing_key).map(|n| n.0),
            "stream": router.route(&row.routing_key),
            "span": entry.span.to_string(),
            "progress_idx": entry.progress_idx,
            "bytes": row.entry_bytes.len(),
        }));
    }
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn print_summary(rows: &[RoutedRow], cluster: &LocalCluster) {
    let mut per_node: BTreeMap<String, usize> = BTreeMap::new();
    for row in rows {
        *per_node.entry(node_label(row)).or_insert(0) += 1;
    }

    let leases: BTreeMap<String, usize> = cluster
        .lease_counts()
        .into_iter()
        .map(|(node, count)| (node.to_string(), count))
        .collect();

    let mut table = ComfyTable::new();
    table.set_header(vec![
        Cell::new("Node").fg(Color::Cyan),
        Cell::new("Rows").fg(Color::Yellow),
        Cell::new("Leases").fg(Color::Green),
    ]);
    let all_nodes: BTreeSet<&String> = per_node.keys().chain(leases.keys()).collect();
    for node in all_nodes {
        table.add_row(vec![
            node.clone(),
            per_node.get(node).copied().unwrap_or(0).to_string(),
            leases
                .get(node)
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{}", "Per-node summary:".bright_yellow().bold());
    println!("{table}");
}

pub fn show_routes(nodes: &[u32]) -> Result<()> {
    let mut table = ComfyTable::new();
    table.set_header(vec![
        Cell::new("Node").fg(Color::Cyan),
        Cell::new("Start").fg(Color::Yellow),
        Cell::new("End").fg(Color::Green),
    ]);

    for node in nodes.iter().copied().map(NodeId) {
        let (start, end) = routing_span_for_node(node);
        table.add_row(vec![node.to_string(), hex(&start), hex(&end)]);
    }

    println!("{}", "Routing spans:".bright_yellow().bold());
    println!("{table}");
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Build a synthetic spec whose keys live under a backup prefix and are
/// rewritten into a new table prefix
pub fn sample_spec(chunks: usize, entries_per_chunk: usize) -> Result<SplitAndScatterSpec> {
    if chunks == 0 || entries_per_chunk == 0 {
        anyhow::bail!("A sample spec needs at least one chunk with one entry");
    }

    let mut progress_idx = 0;
    let chunks = (0..chunks)
        .map(|c| {
            let entries = (0..entries_per_chunk)
                .map(|e| {
                    let key = sample_key(c, e);
                    let end = sample_key(c, e + 1);
                    let entry = RestoreSpanEntry::new(Span::new(key, end))
                        .with_file(format!("{c:04}/{e:04}.sst"))
                        .with_progress_idx(progress_idx);
                    progress_idx += 1;
                    entry
                })
                .collect();
            Chunk::new(entries)
        })
        .collect();

    let rekeys = vec![Rekey::new(SAMPLE_OLD_PREFIX, SAMPLE_NEW_PREFIX)];
    let spec = SplitAndScatterSpec::new(chunks, rekeys);
    spec.validate()?;
    Ok(spec)
}

fn sample_key(chunk: usize, entry: usize) -> Key {
    Key::from(format!("{SAMPLE_OLD_PREFIX}{chunk:04}/{entry:04}").into_bytes())
}

pub fn write_sample_spec(output: &Path, chunks: usize, entries_per_chunk: usize) -> Result<()> {
    let spec = sample_spec(chunks, entries_per_chunk)?;
    spec.save(output)?;
    println!(
        "{} Wrote spec with {} entries to {:?}",
        "✓".bright_green(),
        spec.total_entries(),
        output
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use restore_core::KeyRewriter;

    #[test]
    fn test_sample_spec_shape() {
        let spec = sample_spec(3, 4).unwrap();
        assert_eq!(spec.chunks.len(), 3);
        assert_eq!(spec.total_entries(), 12);

        let last = &spec.chunks[2].entries[3];
        assert_eq!(last.progress_idx, 11);
        assert_eq!(last.files.len(), 1);
    }

    #[test]
    fn test_sample_spec_keys_rewrite() {
        let spec = sample_spec(2, 2).unwrap();
        let rewriter = KeyRewriter::from_rekeys(&spec.rekeys).unwrap();
        for entry in spec.chunks.iter().flat_map(|c| &c.entries) {
            let rewritten = rewriter.rewrite_key(&entry.span.key).unwrap();
            assert!(rewritten.starts_with(SAMPLE_NEW_PREFIX.as_bytes()));
        }
    }

    #[test]
    fn test_sample_spec_rejects_empty() {
        assert!(sample_spec(0, 3).is_err());
        assert!(sample_spec(3, 0).is_err());
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0x12, 0x00, 0xff]), "1200ff");
    }

    #[tokio::test]
    async fn test_run_stage_from_file() {
        let path =
            std::env::temp_dir().join(format!("restorectl-spec-{}.json", std::process::id()));
        sample_spec(2, 3).unwrap().save(&path).unwrap();

        let config = Config {
            show_rows: false,
            ..Default::default()
        };
        let result = run_stage(&path, &[1, 2, 3], TenantScope::System, &config).await;
        std::fs::remove_file(&path).unwrap();
        result.unwrap();
    }

    #[tokio::test]
    async fn test_run_stage_missing_spec() {
        let path = std::env::temp_dir().join("restorectl-does-not-exist.json");
        let result = run_stage(&path, &[1], TenantScope::System, &Config::default()).await;
        assert!(result.is_err());
    }
}
