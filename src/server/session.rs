//! Protocol session: one accepted connection.
//!
//! A session runs two logical loops. The read loop decodes frames, routes
//! them through the auth gate, and hands code-bearing requests to the
//! dispatcher. The write loop is the *single* writer to the connection: it
//! drains a bounded queue of outbound responses and encodes them one frame
//! at a time, so concurrent in-flight requests can never interleave partial
//! writes.
//!
//! On read-loop termination (client disconnect, frame error, idle timeout,
//! listener shutdown) the session cancels all in-flight request tokens and
//! lets the write loop drain already-queued terminal responses — bounded by
//! a grace period — before the connection closes.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::protocol::codec::FrameCodec;
use crate::protocol::message::{Request, Response};
use crate::server::auth::{AuthDecision, AuthGate};
use crate::server::dispatch::Dispatcher;
use crate::AppError;

/// Capacity of the per-session outbound response queue. Producers suspend
/// when it is full, providing backpressure against a slow client.
const WRITE_QUEUE_CAPACITY: usize = 64;

/// How long teardown waits for the write loop to drain queued responses.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Immutable per-connection parameters derived from the server config.
#[derive(Clone)]
pub(crate) struct SessionParams {
    pub auth: AuthGate,
    pub dispatcher: Dispatcher,
    pub max_frame_bytes: usize,
    pub idle_timeout: Option<Duration>,
}

/// Mutable session state guarded by a single lock so the auth transition
/// and in-flight id registration are atomic with respect to concurrent
/// requests on the same session.
#[derive(Default)]
pub(crate) struct SessionInner {
    pub authenticated: bool,
    pub in_flight: HashMap<String, CancellationToken>,
}

/// State shared between the read loop and dispatched request tasks.
pub(crate) struct SessionShared {
    /// Short identifier for log correlation.
    pub session_id: String,
    /// Outbound queue; the write loop is the sole consumer.
    pub write_tx: mpsc::Sender<Response>,
    /// Cancelled on teardown; parent of every per-request token.
    pub cancel: CancellationToken,
    /// Auth state and in-flight registry.
    pub inner: Mutex<SessionInner>,
}

/// Drive one accepted connection to completion.
pub(crate) async fn run_session(
    stream: TcpStream,
    peer: SocketAddr,
    params: SessionParams,
    cancel: CancellationToken,
) {
    let session_id: String = uuid::Uuid::new_v4().simple().to_string().chars().take(8).collect();
    let span = info_span!("session", id = %session_id, %peer);

    async move {
        info!("session opened");

        let (read_half, write_half) = stream.into_split();
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);

        let shared = Arc::new(SessionShared {
            session_id: session_id.clone(),
            write_tx,
            cancel,
            inner: Mutex::new(SessionInner::default()),
        });

        let mut write_handle = tokio::spawn(
            run_write_loop(write_half, write_rx, params.max_frame_bytes)
                .instrument(info_span!("write_loop", id = %session_id)),
        );

        let mut framed = FramedRead::new(
            read_half,
            FrameCodec::with_max_frame_bytes(params.max_frame_bytes),
        );

        run_read_loop(&mut framed, &shared, &params).await;

        // Teardown: cancel all in-flight work, then let the write loop
        // drain. Dropping `framed` and `shared` closes the read half and —
        // once the last dispatch task finishes — the write queue.
        shared.cancel.cancel();
        drop(shared);
        drop(framed);

        if tokio::time::timeout(DRAIN_GRACE, &mut write_handle)
            .await
            .is_err()
        {
            warn!("write loop did not drain within grace period, aborting");
            write_handle.abort();
        }

        info!("session closed");
    }
    .instrument(span)
    .await;
}

/// What the read loop saw when it asked for the next frame.
enum ReadEvent {
    Frame(serde_json::Value),
    Closed,
    IdleTimeout,
    Failed(AppError),
}

async fn next_event(
    framed: &mut FramedRead<OwnedReadHalf, FrameCodec>,
    idle_timeout: Option<Duration>,
) -> ReadEvent {
    let item = if let Some(limit) = idle_timeout {
        match tokio::time::timeout(limit, framed.next()).await {
            Ok(item) => item,
            Err(_) => return ReadEvent::IdleTimeout,
        }
    } else {
        framed.next().await
    };

    match item {
        Some(Ok(value)) => ReadEvent::Frame(value),
        Some(Err(err)) => ReadEvent::Failed(err),
        None => ReadEvent::Closed,
    }
}

async fn run_read_loop(
    framed: &mut FramedRead<OwnedReadHalf, FrameCodec>,
    shared: &Arc<SessionShared>,
    params: &SessionParams,
) {
    loop {
        tokio::select! {
            biased;

            () = shared.cancel.cancelled() => {
                debug!("cancellation received, stopping read loop");
                break;
            }

            event = next_event(framed, params.idle_timeout) => {
                match event {
                    ReadEvent::Frame(value) => {
                        handle_request(shared, params, value).await;
                    }
                    ReadEvent::Closed => {
                        debug!("client disconnected");
                        break;
                    }
                    ReadEvent::IdleTimeout => {
                        info!("idle timeout reached, closing session");
                        break;
                    }
                    ReadEvent::Failed(err) => {
                        // Frame-level errors are not recoverable: the stream
                        // position is unknown, so the session is torn down.
                        warn!(%err, "frame error, closing session");
                        break;
                    }
                }
            }
        }
    }
}

/// Route one decoded frame: parse, auth-check, then answer or dispatch.
async fn handle_request(
    shared: &Arc<SessionShared>,
    params: &SessionParams,
    value: serde_json::Value,
) {
    // Keep a best-effort id so shape errors can still be correlated.
    let fallback_id = value
        .get("id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let request: Request = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(err) => {
            warn!(id = %fallback_id, %err, "malformed request");
            enqueue(
                shared,
                Response::failure(fallback_id, format!("invalid request: {err}"), None),
            )
            .await;
            return;
        }
    };

    // Auth decision and in-flight registration happen under one lock.
    let mut inner = shared.inner.lock().await;

    match params.auth.check(inner.authenticated, &request) {
        AuthDecision::Denied(reason) => {
            drop(inner);
            warn!(id = %request.id, %reason, "request rejected");
            enqueue(shared, Response::failure(request.id, reason, None)).await;
            return;
        }
        AuthDecision::GrantedNewAuth => {
            inner.authenticated = true;
            info!(id = %request.id, "session authenticated");
        }
        AuthDecision::Granted => {}
    }

    if request.code.is_some() {
        params.dispatcher.submit(shared, &mut inner, request).await;
        return;
    }
    drop(inner);

    if request.token.is_some() {
        // Pure authentication handshake: acknowledge with a terminal
        // response even though no code ran.
        enqueue(shared, Response::success(request.id, None)).await;
    } else {
        enqueue(
            shared,
            Response::failure(request.id, "missing required field: code", None),
        )
        .await;
    }
}

/// Queue a response for the write loop, logging when the session is gone.
pub(crate) async fn enqueue(shared: &SessionShared, response: Response) {
    if shared.write_tx.send(response).await.is_err() {
        debug!("write queue closed, response dropped");
    }
}

/// Single-writer loop: drains the response queue until every sender is
/// dropped, encoding one frame per response.
async fn run_write_loop(
    write_half: OwnedWriteHalf,
    mut write_rx: mpsc::Receiver<Response>,
    max_frame_bytes: usize,
) {
    let mut framed = FramedWrite::new(write_half, FrameCodec::with_max_frame_bytes(max_frame_bytes));

    while let Some(response) = write_rx.recv().await {
        let value = match serde_json::to_value(&response) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "failed to serialise response, dropping");
                continue;
            }
        };

        if let Err(err) = framed.send(value).await {
            warn!(%err, "write failed, stopping write loop");
            break;
        }
    }

    debug!("write loop stopped");
}
