//! Request coalescing.
//!
//! A [`BatchQueue`] intercepts the `send` moment of registered queries. Each
//! intercepted request becomes a pending operation and its caller gets a
//! future that the queue settles later. [`BatchQueue::flush`] groups pending
//! operations into chunks of at most `max_chunk_size`, sends each chunk as one
//! aggregate call, and settles every operation from its paired fragment.
//!
//! ```text
//!   query.execute() ─▶ raise marker ─▶ … ─▶ send: enqueue, lower ─┐
//!   query.execute() ─▶ raise marker ─▶ … ─▶ send: enqueue, lower ─┤  pending (registration order)
//!                                                                 ▼
//!   flush(): await markers ─▶ drain ─▶ [chunk 1] ─▶ encode ─▶ POST ─▶ decode ─▶ settle 1..n
//!                                      [chunk 2] ─▶ ...        (sequential)
//! ```
//!
//! # Guarantees
//!
//! - Every accepted operation is settled exactly once: with its fragment,
//!   with its chunk's failure, with `MissingResponse`, or with `Dropped` if the
//!   queue goes away unflushed or a flush is cancelled before settling it.
//! - No aggregate call carries more than
//!   [`MAX_CHUNK_SIZE`](crate::config::MAX_CHUNK_SIZE) fragments,
//!   whatever the configured chunk size.
//! - Within a chunk, operations settle in registration order; chunk N settles
//!   completely before chunk N+1 is sent.
//! - A whole-chunk failure (transport, non-2xx, malformed reply, top-level
//!   error) rejects every operation in that chunk and nothing else.
//!
//! Registration markers close the race between a query that has started a
//! run and a flush that begins before the run reaches `send`. A linked run
//! raises a marker when it starts and drops it as soon as `send` has been
//! dispatched, or when it ends early. Flush waits for every raised marker
//! before it stops accepting operations.

pub mod codec;

use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use queryline_timeline::{
    Behavior, LogLevel, MomentFuture, SubscribeMode, Timeline, TimelineError, observer,
};
use queryline_types::{BatchId, HttpRequest, HttpResponse, RequestInit};
use tokio::sync::oneshot;

use crate::config::BatchConfig;
use crate::error::BatchError;
use crate::query::{Query, SEND};
use crate::transport::Transport;

pub use codec::{DecodedBatch, ItemResponse};

/// Callback settling one pending operation.
pub type Settle = Box<dyn FnOnce(Result<ItemResponse, BatchError>) + Send>;

/// A captured send waiting for its chunk.
struct PendingOperation {
    /// Inherited view of the pipeline that issued the request, for logging.
    origin: Timeline,
    request: HttpRequest,
    batch: BatchId,
    /// Taken when the operation settles; still present on drop means unsettled.
    settle: Option<Settle>,
}

impl PendingOperation {
    fn settle(mut self, result: Result<ItemResponse, BatchError>) {
        self.resolve(result);
    }

    fn resolve(&mut self, result: Result<ItemResponse, BatchError>) {
        let Some(settle) = self.settle.take() else {
            return;
        };
        let outcome = match &result {
            Ok(item) => item.status().to_string(),
            Err(err) => format!("failed: {err}"),
        };
        let level = if result.is_ok() {
            LogLevel::Verbose
        } else {
            LogLevel::Warning
        };
        self.origin.log(
            format!(
                "[batch:{}] {} {} -> {}",
                self.batch.short(),
                self.request.method(),
                self.request.url,
                outcome
            ),
            level,
        );
        settle(result);
    }
}

impl Drop for PendingOperation {
    fn drop(&mut self) {
        self.resolve(Err(BatchError::Dropped));
    }
}

#[derive(Default)]
struct Inner {
    operations: Vec<PendingOperation>,
    /// Raised registration markers not yet waited on by flush.
    markers: Vec<oneshot::Receiver<()>>,
    draining: bool,
}

struct BatchState {
    id: BatchId,
    inner: Mutex<Inner>,
}

impl BatchState {
    fn enqueue(&self, origin: &Timeline, request: HttpRequest, settle: Settle) -> Result<(), BatchError> {
        let message = format!(
            "[batch:{}] queued {} {}",
            self.id.short(),
            request.method(),
            request.url
        );
        {
            let mut inner = self.inner.lock();
            if inner.draining {
                return Err(BatchError::Draining);
            }
            inner.operations.push(PendingOperation {
                origin: origin.inherit(),
                request,
                batch: self.id,
                settle: Some(settle),
            });
            tracing::trace!(batch = %self.id, pending = inner.operations.len(), "operation queued");
        }
        origin.log(message, LogLevel::Verbose);
        Ok(())
    }

    /// Raise a registration marker; the returned sender lowers it.
    fn raise_marker(&self) -> Result<oneshot::Sender<()>, BatchError> {
        let mut inner = self.inner.lock();
        if inner.draining {
            return Err(BatchError::Draining);
        }
        let (tx, rx) = oneshot::channel();
        inner.markers.push(rx);
        Ok(tx)
    }
}

/// Link from a registered query to its batch.
#[derive(Clone)]
pub(crate) struct BatchGate(Arc<BatchState>);

impl BatchGate {
    /// Raise a registration marker. Dropping the sender lowers it.
    ///
    /// `None` once the batch is draining; the run then fails at `send`.
    pub(crate) fn raise(&self) -> Option<oneshot::Sender<()>> {
        self.0.raise_marker().ok()
    }
}

impl std::fmt::Debug for BatchGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BatchGate").field(&self.0.id).finish()
    }
}

/// One logical batch scope.
///
/// Created per batch, registered with queries, flushed once. Dropping an
/// unflushed queue settles everything it holds with [`BatchError::Dropped`].
pub struct BatchQueue {
    state: Arc<BatchState>,
    transport: Arc<dyn Transport>,
    config: BatchConfig,
}

impl BatchQueue {
    pub fn new(transport: Arc<dyn Transport>, config: BatchConfig) -> Self {
        let id = BatchId::new();
        if let Err(err) = config.validate() {
            tracing::warn!(batch = %id, error = %err, chunk_size = config.chunk_size(), "batch config out of range, clamping");
        }
        tracing::debug!(batch = %id, chunk_size = config.chunk_size(), "batch opened");
        Self {
            state: Arc::new(BatchState {
                id,
                inner: Mutex::new(Inner::default()),
            }),
            transport,
            config,
        }
    }

    pub fn id(&self) -> BatchId {
        self.state.id
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Operations waiting for flush.
    pub fn len(&self) -> usize {
        self.state.inner.lock().operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capture one request directly.
    ///
    /// On `Ok`, `settle` is called exactly once. On `Err(Draining)` it is
    /// dropped uncalled.
    pub fn enqueue(
        &self,
        origin: &Timeline,
        request: HttpRequest,
        settle: impl FnOnce(Result<ItemResponse, BatchError>) + Send + 'static,
    ) -> Result<(), BatchError> {
        self.state.enqueue(origin, request, Box::new(settle))
    }

    /// Route `query`'s sends through this batch.
    ///
    /// Also links the query to this batch so that each of its runs holds
    /// [`flush`](Self::flush) back until it has enqueued (or failed).
    /// Children created afterwards with [`Query::child`] share the link.
    pub fn register(&self, query: &mut Query) -> Result<(), TimelineError> {
        query.using(self.behavior())?;
        query.set_gate(BatchGate(self.state.clone()));
        Ok(())
    }

    /// The `send` interceptor [`register`](Self::register) installs.
    ///
    /// Applied on its own it does not link the query, so a flush may drain
    /// before a run that is still upstream of `send` reaches it.
    pub fn behavior(&self) -> impl Behavior + use<> {
        let state = self.state.clone();
        move |timeline: &mut Timeline| -> Result<(), TimelineError> {
            timeline.subscribe(
                &SEND,
                observer(move |timeline: &Timeline, request: HttpRequest| -> MomentFuture<HttpResponse> {
                    let (tx, rx) = oneshot::channel();
                    let enqueued = state.enqueue(
                        timeline,
                        request,
                        Box::new(move |result: Result<ItemResponse, BatchError>| {
                            let _ = tx.send(result);
                        }),
                    );
                    async move {
                        enqueued?;
                        let result = rx.await.unwrap_or(Err(BatchError::Dropped));
                        Ok::<_, TimelineError>(result?.into_http())
                    }
                    .boxed()
                }),
                SubscribeMode::Replace,
            )?;
            Ok(())
        }
    }

    /// Send everything queued and settle every operation.
    ///
    /// Waits for in-flight registrations first. Chunks are sent one at a
    /// time. Returns the first whole-chunk failure, after all chunks have
    /// been processed; per-item failures only reach their own callers.
    pub async fn flush(self) -> Result<(), BatchError> {
        let operations = self.drain().await;
        let id = self.state.id;
        if operations.is_empty() {
            tracing::debug!(batch = %id, "flush with nothing queued");
            return Ok(());
        }

        let chunk_size = self.config.chunk_size();
        let chunks = operations.len().div_ceil(chunk_size);
        tracing::info!(batch = %id, operations = operations.len(), chunks, "flushing batch");

        let mut first_error = None;
        let mut remaining = operations.into_iter();
        for index in 0..chunks {
            let chunk: Vec<PendingOperation> = remaining.by_ref().take(chunk_size).collect();
            if let Err(err) = self.process_chunk(index, chunk).await {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Wait until no registration marker is raised, then stop accepting
    /// operations and take them all.
    async fn drain(&self) -> Vec<PendingOperation> {
        loop {
            let markers = {
                let mut inner = self.state.inner.lock();
                if inner.markers.is_empty() {
                    inner.draining = true;
                    break std::mem::take(&mut inner.operations);
                }
                std::mem::take(&mut inner.markers)
            };
            tracing::trace!(batch = %self.state.id, markers = markers.len(), "waiting for registrations");
            for marker in markers {
                // Sent or dropped, either way the marker is down
                let _ = marker.await;
            }
        }
    }

    async fn process_chunk(
        &self,
        index: usize,
        chunk: Vec<PendingOperation>,
    ) -> Result<(), BatchError> {
        let id = self.state.id;
        let size = chunk.len();

        let decoded = match self.transmit(&chunk).await {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(batch = %id, chunk = index, size, error = %err, "chunk failed");
                for operation in chunk {
                    operation.settle(Err(err.clone()));
                }
                return Err(err);
            }
        };

        if let Some(link) = &decoded.continuation {
            tracing::warn!(batch = %id, chunk = index, next_link = %link, "ignoring batch continuation");
        }

        for (position, (operation, result)) in chunk.into_iter().zip(decoded.results).enumerate() {
            let result = result.unwrap_or_else(|| {
                Err(BatchError::MissingResponse {
                    id: (position + 1).to_string(),
                })
            });
            operation.settle(result);
        }
        tracing::debug!(batch = %id, chunk = index, size, "chunk settled");
        Ok(())
    }

    /// Encode, send and decode one chunk.
    async fn transmit(&self, chunk: &[PendingOperation]) -> Result<DecodedBatch, BatchError> {
        let aggregate = codec::encode(self.state.id, chunk.iter().map(|op| &op.request))?;
        let body = codec::to_body(&aggregate)?;
        let request = HttpRequest::new(
            self.config.endpoint.clone(),
            RequestInit::post(body)
                .with_header("Content-Type", "application/json")
                .with_header("Accept", "application/json"),
        );

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(BatchError::Status {
                status: response.status,
                body: response.body,
            });
        }
        let raw = response
            .body
            .ok_or_else(|| BatchError::MalformedResponse("empty body".into()))?;
        codec::decode(&raw, chunk.len())
    }
}

impl Drop for BatchQueue {
    fn drop(&mut self) {
        let orphaned = {
            let mut inner = self.state.inner.lock();
            inner.draining = true;
            inner.markers.clear();
            std::mem::take(&mut inner.operations)
        };
        if orphaned.is_empty() {
            return;
        }
        tracing::warn!(batch = %self.state.id, operations = orphaned.len(), "batch dropped unflushed");
        for operation in orphaned {
            operation.settle(Err(BatchError::Dropped));
        }
    }
}

impl std::fmt::Debug for BatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchQueue")
            .field("id", &self.state.id)
            .field("pending", &self.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
