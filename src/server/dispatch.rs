//! Request dispatch: per-request concurrency, cancellation, and ordered
//! response delivery.
//!
//! Each accepted request runs as its own task, so one session can execute
//! several requests concurrently when the client uses distinct ids. The
//! dispatcher owns the ordering contract: for a single id every chunk is
//! queued in production order and the terminal response is queued last —
//! the chunk channel only closes once the engine has returned, so no chunk
//! can trail its terminal response.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::engine::{ExecutionEngine, OutputSink};
use crate::protocol::message::{Request, Response};
use crate::server::session::{enqueue, SessionInner, SessionShared};
use crate::AppError;

/// Capacity of the per-request chunk channel between engine and dispatcher.
const CHUNK_CHANNEL_CAPACITY: usize = 32;

/// Routes authenticated requests to the execution engine.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    engine: Arc<dyn ExecutionEngine>,
}

impl Dispatcher {
    pub(crate) fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self { engine }
    }

    /// Register `request.id` and launch its execution task.
    ///
    /// The caller holds the session lock, which makes the duplicate check,
    /// the auth transition that preceded it, and the registration one
    /// atomic step. A reused in-flight id is rejected with a terminal error
    /// response; the original request is unaffected.
    pub(crate) async fn submit(
        &self,
        shared: &Arc<SessionShared>,
        inner: &mut SessionInner,
        request: Request,
    ) {
        let Some(code) = request.code else {
            // The session only dispatches code-bearing requests.
            return;
        };

        if inner.in_flight.contains_key(&request.id) {
            enqueue(
                shared,
                Response::failure(
                    request.id.clone(),
                    format!("duplicate id: request '{}' is still in flight", request.id),
                    None,
                ),
            )
            .await;
            return;
        }

        let cancel = shared.cancel.child_token();
        inner.in_flight.insert(request.id.clone(), cancel.clone());

        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(shared);
        tokio::spawn(run_request(
            engine,
            shared,
            request.id,
            code,
            request.stream,
            cancel,
        ));
    }
}

/// Execute one request to its terminal response.
async fn run_request(
    engine: Arc<dyn ExecutionEngine>,
    shared: Arc<SessionShared>,
    id: String,
    code: String,
    stream: bool,
    cancel: CancellationToken,
) {
    let span = info_span!("request", session = %shared.session_id, id = %id);

    async move {
        let (chunk_tx, mut chunk_rx) = mpsc::channel(CHUNK_CHANNEL_CAPACITY);
        let sink = OutputSink::new(chunk_tx);

        let exec_handle = {
            let engine = Arc::clone(&engine);
            let cancel = cancel.clone();
            tokio::spawn(async move { engine.execute(code, cancel, sink).await })
        };

        // Drain chunks until the engine drops its sink. Streamed chunks go
        // straight onto the session write queue; buffered mode collects
        // them for the terminal response.
        let mut buffered: Vec<String> = Vec::new();
        while let Some(chunk) = chunk_rx.recv().await {
            if stream {
                if shared.write_tx.send(Response::chunk(id.clone(), chunk)).await.is_err() {
                    debug!("session closed mid-stream");
                    break;
                }
            } else {
                buffered.push(chunk);
            }
        }
        // Closing the receiver makes any still-pending emit fail fast
        // instead of wedging an engine that ignored cancellation.
        drop(chunk_rx);

        let result = match exec_handle.await {
            Ok(result) => result,
            Err(err) => Err(AppError::Execution(format!("execution task failed: {err}"))),
        };

        // Deregister before queueing the terminal response: the id becomes
        // reusable no earlier than the client can observe the terminal state.
        shared.inner.lock().await.in_flight.remove(&id);

        let response = match result {
            Ok(final_output) => {
                let output = if stream {
                    Some(final_output)
                } else {
                    Some(combine(buffered, final_output))
                };
                Response::success(id.clone(), output)
            }
            Err(err) => {
                let partial = if stream || buffered.is_empty() {
                    None
                } else {
                    Some(buffered.join("\n"))
                };
                Response::failure(id.clone(), err.message(), partial)
            }
        };

        enqueue(&shared, response).await;
    }
    .instrument(span)
    .await;
}

/// Join buffered chunks and the engine's final output into the single
/// terminal output of a non-streaming request.
fn combine(buffered: Vec<String>, final_output: String) -> String {
    let mut parts = buffered;
    if !final_output.is_empty() {
        parts.push(final_output);
    }
    parts.join("\n")
}
