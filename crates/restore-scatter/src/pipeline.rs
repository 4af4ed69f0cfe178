//! Chunk feeder and scatter worker pool
//!
//! One feeder walks the chunks in order. For each chunk it splits and
//! scatters the chunk's first key with lease randomization, which spreads a
//! coarse placement over the cluster, then hands the chunk to the workers.
//! Workers split and scatter every entry's own key precisely and push the
//! entry with its destination onto the completion queue.
//!
//! All tasks share one cancellation token. The first task to fail cancels
//! the others and its error is the result of the run.

use crate::scatterer::Scatterer;
use crate::types::EntryNode;
use restore_core::{KeyRewriter, RestoreError, RestoreSpanEntry, Result, SplitAndScatterSpec};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A chunk on its way to the workers. The worker that takes it acknowledges
/// through `taken`, which is what the feeder waits on before moving on.
struct ChunkHandoff {
    entries: Vec<RestoreSpanEntry>,
    taken: oneshot::Sender<()>,
}

type ChunkReceiver = Arc<Mutex<mpsc::Receiver<ChunkHandoff>>>;

/// Split and scatter every entry of `spec`, sending each completed entry to
/// `done_tx`.
///
/// Returns once all entries were sent, the first task failed, or `cancel`
/// fired. Cancellation is not an error.
pub async fn run_split_and_scatter(
    spec: Arc<SplitAndScatterSpec>,
    scatterer: Arc<dyn Scatterer>,
    workers: usize,
    done_tx: mpsc::Sender<EntryNode>,
    cancel: CancellationToken,
) -> Result<()> {
    let start = Instant::now();
    let kr = Arc::new(KeyRewriter::from_rekeys(&spec.rekeys)?);
    let scattered = Arc::new(AtomicUsize::new(0));

    // Together with the acknowledgement, a one-slot channel behaves as an
    // unbuffered handoff: the feeder never gets a chunk ahead of the workers.
    let (chunk_tx, chunk_rx) = mpsc::channel::<ChunkHandoff>(1);
    let chunk_rx: ChunkReceiver = Arc::new(Mutex::new(chunk_rx));

    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    tasks.spawn(feed_chunks(
        spec.clone(),
        scatterer.clone(),
        kr.clone(),
        chunk_tx,
        cancel.clone(),
    ));
    for worker in 0..workers {
        tasks.spawn(scatter_entries(
            worker,
            scatterer.clone(),
            kr.clone(),
            chunk_rx.clone(),
            done_tx.clone(),
            scattered.clone(),
            cancel.clone(),
        ));
    }
    // Workers hold the remaining senders; the queue closes when they exit.
    drop(chunk_rx);
    drop(done_tx);

    let mut first_error: Option<RestoreError> = None;
    while let Some(joined) = tasks.join_next().await {
        let err = match joined {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => err,
            Err(join_err) if join_err.is_cancelled() => continue,
            Err(join_err) => RestoreError::Internal(format!("scatter task panicked: {join_err}")),
        };
        if first_error.is_none() {
            tracing::debug!(error = %err, "split and scatter task failed, cancelling siblings");
            cancel.cancel();
            tasks.abort_all();
            first_error = Some(err);
        }
    }

    let scattered = scattered.load(Ordering::Relaxed);
    let elapsed_ms = start.elapsed().as_millis() as u64;
    match first_error {
        Some(err) => {
            tracing::info!(scattered, elapsed_ms, error = %err, "split and scatter failed");
            Err(err)
        }
        None => {
            tracing::info!(
                scattered,
                chunks = spec.chunks.len(),
                elapsed_ms,
                cancelled = cancel.is_cancelled(),
                "split and scatter finished"
            );
            Ok(())
        }
    }
}

/// Pre-split each chunk at its first key and publish it to the workers
async fn feed_chunks(
    spec: Arc<SplitAndScatterSpec>,
    scatterer: Arc<dyn Scatterer>,
    kr: Arc<KeyRewriter>,
    chunk_tx: mpsc::Sender<ChunkHandoff>,
    cancel: CancellationToken,
) -> Result<()> {
    for (idx, chunk) in spec.chunks.iter().enumerate() {
        let Some(head) = chunk.head() else {
            continue;
        };

        // The chunk-level destination is only a placement hint.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            res = scatterer.split_and_scatter_key(&kr, &head.span.key, true) => {
                res?;
            }
        }

        tracing::debug!(chunk = idx, entries = chunk.entries.len(), "publishing chunk");
        let (taken_tx, taken_rx) = oneshot::channel();
        let handoff = ChunkHandoff {
            entries: chunk.entries.clone(),
            taken: taken_tx,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            sent = chunk_tx.send(handoff) => {
                if sent.is_err() {
                    // Every worker is gone.
                    return Ok(());
                }
            }
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            taken = taken_rx => {
                if taken.is_err() {
                    // Dropped untaken, the workers are shutting down.
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}

/// Split and scatter every entry of the chunks received from the feeder
async fn scatter_entries(
    worker: usize,
    scatterer: Arc<dyn Scatterer>,
    kr: Arc<KeyRewriter>,
    chunk_rx: ChunkReceiver,
    done_tx: mpsc::Sender<EntryNode>,
    scattered: Arc<AtomicUsize>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            chunk = async { chunk_rx.lock().await.recv().await } => chunk,
        };
        let Some(ChunkHandoff { entries, taken }) = chunk else {
            return Ok(());
        };
        // Lets the feeder move on to the next chunk head.
        let _ = taken.send(());

        tracing::debug!(worker, entries = entries.len(), "processing a chunk");
        for entry in entries {
            tracing::debug!(worker, span = %entry.span, "processing a span");
            let node = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                res = scatterer.split_and_scatter_key(&kr, &entry.span.key, false) => res?,
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = done_tx.send(EntryNode { entry, node }) => {
                    if sent.is_err() {
                        // The consumer went away.
                        return Ok(());
                    }
                }
            }
            scattered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::LocalCluster;
    use crate::scatterer::DbScatterer;
    use restore_core::{Chunk, Key, NodeId, Rekey, Span};
    use std::collections::HashSet;
    use std::time::Duration;

    fn spec(chunks: &[&[&str]]) -> SplitAndScatterSpec {
        let chunks = chunks
            .iter()
            .map(|keys| {
                Chunk::new(
                    keys.iter()
                        .map(|k| RestoreSpanEntry::new(Span::new(*k, Key::from(*k).next())))
                        .collect(),
                )
            })
            .collect();
        SplitAndScatterSpec::new(chunks, vec![Rekey::new("/t/", "/r/")])
    }

    fn db_scatterer(cluster: &Arc<LocalCluster>) -> Arc<dyn Scatterer> {
        Arc::new(DbScatterer::new(cluster.clone(), Duration::from_secs(3600)))
    }

    async fn drain(mut rx: mpsc::Receiver<EntryNode>) -> Vec<EntryNode> {
        let mut out = Vec::new();
        while let Some(e) = rx.recv().await {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn test_every_entry_is_scattered_once() {
        let cluster = Arc::new(LocalCluster::with_node_count(3));
        let spec = Arc::new(spec(&[&["/t/a", "/t/b", "/t/c"], &["/t/d", "/t/e"]]));
        let (tx, rx) = mpsc::channel(spec.total_entries());

        run_split_and_scatter(spec, db_scatterer(&cluster), 2, tx, CancellationToken::new())
            .await
            .unwrap();

        let done = drain(rx).await;
        let keys: HashSet<Key> = done.iter().map(|e| e.entry.span.key.clone()).collect();
        assert_eq!(done.len(), 5);
        assert_eq!(keys.len(), 5);
        assert!(done.iter().all(|e| !e.node.is_unknown()));
        // One split per chunk head and one per entry.
        assert_eq!(cluster.split_count(), 7);
    }

    #[tokio::test]
    async fn test_split_failure_stops_run() {
        let cluster = Arc::new(LocalCluster::with_node_count(3));
        cluster.fail_split_at("/r/b");
        let spec = Arc::new(spec(&[&["/t/a", "/t/b"], &["/t/c", "/t/d"]]));
        let (tx, rx) = mpsc::channel(spec.total_entries());

        let err = run_split_and_scatter(spec, db_scatterer(&cluster), 1, tx, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_split_failure());
        let done = drain(rx).await;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].entry.span.key, Key::from("/t/a"));
    }

    #[tokio::test]
    async fn test_feeder_waits_for_chunk_to_be_taken() {
        let cluster = Arc::new(LocalCluster::with_node_count(3));
        cluster.set_latency(Some(Duration::from_millis(20)));
        cluster.fail_split_at("/r/b");
        let spec = Arc::new(spec(&[&["/t/a", "/t/b"], &["/t/c"], &["/t/d"]]));
        let (tx, _rx) = mpsc::channel(spec.total_entries());

        let err = run_split_and_scatter(spec, db_scatterer(&cluster), 1, tx, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.is_split_failure());
        // Heads of the first two chunks, then /r/a and the failing /r/b. The
        // second chunk was never taken, so the third head was never split.
        assert_eq!(cluster.split_count(), 4);
        assert_eq!(cluster.range_count(), 3);
    }

    #[tokio::test]
    async fn test_chunk_head_failure_is_fatal() {
        let cluster = Arc::new(LocalCluster::with_node_count(3));
        cluster.fail_split_at("/r/a");
        let spec = Arc::new(spec(&[&["/t/a", "/t/b"]]));
        let (tx, rx) = mpsc::channel(spec.total_entries());

        let res =
            run_split_and_scatter(spec, db_scatterer(&cluster), 2, tx, CancellationToken::new())
                .await;

        assert!(res.is_err());
        assert!(drain(rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_rekeys_fail_before_any_split() {
        let cluster = Arc::new(LocalCluster::with_node_count(3));
        let mut spec = spec(&[&["/t/a"]]);
        spec.rekeys.push(Rekey::new("", "/x/"));
        let (tx, _rx) = mpsc::channel(1);

        let err = run_split_and_scatter(
            Arc::new(spec),
            db_scatterer(&cluster),
            2,
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, RestoreError::InvalidRekey(_)));
        assert_eq!(cluster.split_count(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_an_error() {
        let cluster = Arc::new(LocalCluster::with_node_count(3));
        cluster.set_latency(Some(Duration::from_millis(20)));
        let spec = Arc::new(spec(&[&["/t/a", "/t/b", "/t/c", "/t/d", "/t/e", "/t/f"]]));
        let (tx, _rx) = mpsc::channel(spec.total_entries());
        let cancel = CancellationToken::new();

        let run = tokio::spawn(run_split_and_scatter(
            spec,
            db_scatterer(&cluster),
            2,
            tx,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();

        let res = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("run should stop promptly after cancellation")
            .unwrap();
        assert!(res.is_ok());
        assert!(cluster.scatter_count() < 7);
    }

    #[tokio::test]
    async fn test_workers_are_tunable() {
        let cluster = Arc::new(LocalCluster::with_node_count(4));
        let keys: Vec<String> = (0..40).map(|i| format!("/t/{:03}", i)).collect();
        let chunk: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        let spec = Arc::new(spec(&[&chunk[..20], &chunk[20..]]));
        let (tx, rx) = mpsc::channel(spec.total_entries());

        run_split_and_scatter(spec, db_scatterer(&cluster), 8, tx, CancellationToken::new())
            .await
            .unwrap();

        let done = drain(rx).await;
        assert_eq!(done.len(), 40);
        let nodes: HashSet<NodeId> = done.iter().map(|e| e.node).collect();
        assert!(nodes.len() > 1);
    }
}
