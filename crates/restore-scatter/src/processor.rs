//! The split and scatter processor
//!
//! Runs the feeder and worker pool in the background and exposes their
//! results through a pull interface: every call to [`RowSource::next`]
//! yields one routed row per scattered entry until the background work
//! finishes. The completion queue is sized to the total number of entries,
//! so workers never wait on a slow consumer; the cost is holding up to all
//! results in memory at once.

use crate::config::ScatterConfig;
use crate::pipeline::run_split_and_scatter;
use crate::routing::RoutingDatumCache;
use crate::scatterer::Scatterer;
use crate::types::{EntryNode, ProcessorId, ProcessorState};
use arrow::array::{ArrayRef, BinaryArray};
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use restore_core::{output_schema, RestoreError, RestoreSpanEntry, Result, SplitAndScatterSpec};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A row produced by the processor: the routing key of the entry's
/// destination node and the serialized entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedRow {
    pub routing_key: Arc<[u8]>,
    pub entry_bytes: Vec<u8>,
}

impl RoutedRow {
    pub fn decode_entry(&self) -> Result<RestoreSpanEntry> {
        RestoreSpanEntry::decode(&self.entry_bytes)
    }
}

/// Pack rows into a record batch with the processor's output schema
pub fn rows_to_batch(rows: &[RoutedRow]) -> Result<RecordBatch> {
    let routing_keys = BinaryArray::from_iter_values(rows.iter().map(|r| &r.routing_key[..]));
    let entries = BinaryArray::from_iter_values(rows.iter().map(|r| r.entry_bytes.as_slice()));
    let batch = RecordBatch::try_new(
        output_schema(),
        vec![Arc::new(routing_keys) as ArrayRef, Arc::new(entries) as ArrayRef],
    )?;
    Ok(batch)
}

/// Pull-based source of rows driven by the surrounding engine
#[async_trait]
pub trait RowSource: Send {
    /// Schema of the rows returned by `next`
    fn output_schema(&self) -> SchemaRef;

    /// Launch background work. Returns immediately.
    fn start(&mut self);

    /// Next row, `Some(Err(_))` once if the source failed, then `None`
    async fn next(&mut self) -> Option<Result<RoutedRow>>;

    /// The consumer will not call `next` again
    fn consumer_closed(&mut self);
}

/// Adapt a started source into a stream of rows. The source learns that the
/// consumer is done when the stream ends; dropping the stream early drops
/// the source.
pub fn row_stream(source: Box<dyn RowSource>) -> BoxStream<'static, Result<RoutedRow>> {
    stream::unfold(Some(source), |state| async move {
        let mut source = state?;
        match source.next().await {
            Some(row) => Some((row, Some(source))),
            None => {
                source.consumer_closed();
                None
            }
        }
    })
    .boxed()
}

/// Pre-splits and scatters restore spans and labels each entry with the
/// node it was scattered to
pub struct SplitAndScatterProcessor {
    id: ProcessorId,
    spec: Arc<SplitAndScatterSpec>,
    scatterer: Arc<dyn Scatterer>,
    config: ScatterConfig,
    state: ProcessorState,
    /// Taken by `start` and handed to the workers
    done_tx: Option<mpsc::Sender<EntryNode>>,
    done_rx: mpsc::Receiver<EntryNode>,
    cancel: CancellationToken,
    scatter_task: Option<JoinHandle<Result<()>>>,
    /// Only touched from `next`
    routing_cache: RoutingDatumCache,
    /// Terminal error waiting to be reported
    drain_error: Option<RestoreError>,
    closed: bool,
    rows_emitted: usize,
}

impl SplitAndScatterProcessor {
    pub fn new(
        id: ProcessorId,
        spec: SplitAndScatterSpec,
        scatterer: Arc<dyn Scatterer>,
        config: ScatterConfig,
    ) -> Result<Self> {
        spec.validate()?;
        config.validate()?;

        // Large enough that workers never block on the consumer.
        let capacity = spec.total_entries().max(1);
        let (done_tx, done_rx) = mpsc::channel(capacity);

        Ok(Self {
            id,
            spec: Arc::new(spec),
            scatterer,
            config,
            state: ProcessorState::Idle,
            done_tx: Some(done_tx),
            done_rx,
            cancel: CancellationToken::new(),
            scatter_task: None,
            routing_cache: RoutingDatumCache::new(),
            drain_error: None,
            closed: false,
            rows_emitted: 0,
        })
    }

    pub fn id(&self) -> ProcessorId {
        self.id
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn rows_emitted(&self) -> usize {
        self.rows_emitted
    }

    /// Number of distinct destination nodes seen so far
    pub fn routing_cache_len(&self) -> usize {
        self.routing_cache.len()
    }

    fn emit(&mut self, scattered: EntryNode) -> Option<Result<RoutedRow>> {
        let entry_bytes = match scattered.entry.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                self.move_to_draining(Some(err));
                return self.drain_helper();
            }
        };

        // The routing datum tells the router which output stream to use.
        let routing_key = self.routing_cache.get_or_insert(scattered.node);
        self.rows_emitted += 1;
        Some(Ok(RoutedRow {
            routing_key,
            entry_bytes,
        }))
    }

    /// Result of the background run, once the completion queue has closed
    async fn scatter_result(&mut self) -> Option<RestoreError> {
        let handle = self.scatter_task.as_mut()?;
        let joined = handle.await;
        self.scatter_task = None;
        match joined {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(join_err) if join_err.is_cancelled() => None,
            Err(join_err) => Some(RestoreError::Internal(format!(
                "split and scatter task panicked: {join_err}"
            ))),
        }
    }

    fn move_to_draining(&mut self, err: Option<RestoreError>) {
        if let Some(err) = &err {
            tracing::warn!(processor = %self.id, error = %err, "split and scatter draining with error");
        }
        self.drain_error = err;
        self.state = ProcessorState::Draining;
    }

    /// Report the terminal signal and release background work
    fn drain_helper(&mut self) -> Option<Result<RoutedRow>> {
        let err = self.drain_error.take();
        self.close();
        err.map(Err)
    }

    /// Stop background work. Must be called if the consumer stops reading
    /// early; safe to call any number of times.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let started = self.state != ProcessorState::Idle;

        self.cancel.cancel();
        if let Some(handle) = self.scatter_task.take() {
            if !handle.is_finished() {
                tracing::debug!(processor = %self.id, "cancelling in-flight split and scatter");
            }
            handle.abort();
        }
        self.done_tx = None;
        self.done_rx.close();
        self.state = ProcessorState::Closed;

        if started {
            tracing::info!(
                processor = %self.id,
                rows = self.rows_emitted,
                nodes = self.routing_cache.len(),
                "split and scatter processor closed"
            );
        }
    }
}

#[async_trait]
impl RowSource for SplitAndScatterProcessor {
    fn output_schema(&self) -> SchemaRef {
        output_schema()
    }

    fn start(&mut self) {
        if self.state != ProcessorState::Idle {
            tracing::warn!(processor = %self.id, state = %self.state, "processor already started");
            return;
        }
        let Some(done_tx) = self.done_tx.take() else {
            return;
        };

        tracing::info!(
            processor = %self.id,
            chunks = self.spec.chunks.len(),
            entries = self.spec.total_entries(),
            workers = self.config.workers,
            "starting split and scatter"
        );
        self.scatter_task = Some(tokio::spawn(run_split_and_scatter(
            self.spec.clone(),
            self.scatterer.clone(),
            self.config.workers,
            done_tx,
            self.cancel.clone(),
        )));
        self.state = ProcessorState::Running;
    }

    async fn next(&mut self) -> Option<Result<RoutedRow>> {
        match self.state {
            ProcessorState::Idle => {
                return Some(Err(RestoreError::NotStarted(self.id.to_string())));
            }
            ProcessorState::Draining => return self.drain_helper(),
            ProcessorState::Closed => return None,
            ProcessorState::Running => {}
        }

        if let Some(scattered) = self.done_rx.recv().await {
            return self.emit(scattered);
        }

        let err = self.scatter_result().await;
        self.move_to_draining(err);
        self.drain_helper()
    }

    fn consumer_closed(&mut self) {
        // The consumer is done, `next` will not be called again.
        self.close();
    }
}

impl Drop for SplitAndScatterProcessor {
    fn drop(&mut self) {
        self.close();
    }
}
