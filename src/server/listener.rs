//! TCP listener: connection acceptance, capacity enforcement, and graceful
//! shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, info_span, warn, Instrument};

use crate::config::ServerConfig;
use crate::engine::ExecutionEngine;
use crate::server::auth::AuthGate;
use crate::server::dispatch::Dispatcher;
use crate::server::session::{run_session, SessionParams};
use crate::{AppError, Result};

/// Running protocol listener.
///
/// Accepts connections on its bound address until [`Listener::stop`] is
/// called. Each accepted connection becomes an independent session; once
/// `max_connections` sessions are active, further connections are accepted
/// at the transport level and immediately closed with no frames exchanged.
#[derive(Debug)]
pub struct Listener {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    tracker: TaskTracker,
    accept_handle: tokio::task::JoinHandle<()>,
    active: Arc<AtomicUsize>,
}

impl Listener {
    /// Bind `config.host:config.port` and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Bind` when the address is unavailable (already in
    /// use, permission denied, interface absent).
    pub async fn start(config: ServerConfig, engine: Arc<dyn ExecutionEngine>) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr()).await.map_err(|err| {
            AppError::Bind(format!("cannot bind {}: {err}", config.bind_addr()))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| AppError::Bind(format!("cannot resolve bound address: {err}")))?;

        info!(%local_addr, "listener started");

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let active = Arc::new(AtomicUsize::new(0));

        let params = SessionParams {
            auth: AuthGate::new(config.require_token, config.token.clone()),
            dispatcher: Dispatcher::new(engine),
            max_frame_bytes: config.max_frame_bytes,
            idle_timeout: config.idle_timeout(),
        };

        let max_connections = usize::try_from(config.max_connections).unwrap_or(usize::MAX);
        let accept_handle = tokio::spawn(
            accept_loop(
                listener,
                params,
                max_connections,
                cancel.clone(),
                tracker.clone(),
                Arc::clone(&active),
            )
            .instrument(info_span!("listener", addr = %local_addr)),
        );

        Ok(Self {
            local_addr,
            cancel,
            tracker,
            accept_handle,
            active,
        })
    }

    /// Address the listener is bound to. Useful with port 0, where the OS
    /// picks the ephemeral port.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently active sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Close the listening socket and signal all active sessions to
    /// terminate, waiting up to `grace` for them to finish. Sessions not
    /// done by the deadline are abandoned; their tasks observe the
    /// cancelled token and unwind on their own.
    pub async fn stop(self, grace: Duration) {
        info!(addr = %self.local_addr, "listener stopping");
        self.cancel.cancel();
        let _ = self.accept_handle.await;

        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                active = self.active.load(Ordering::SeqCst),
                "sessions did not terminate within grace period"
            );
        }

        info!("listener stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    params: SessionParams,
    max_connections: usize,
    cancel: CancellationToken,
    tracker: TaskTracker,
    active: Arc<AtomicUsize>,
) {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                info!("accept loop shutting down");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if active.load(Ordering::SeqCst) >= max_connections {
                            // At capacity: close immediately, before any frame
                            // is exchanged, to avoid resource exhaustion.
                            warn!(%peer, max_connections, "connection limit reached, dropping connection");
                            drop(stream);
                            continue;
                        }

                        active.fetch_add(1, Ordering::SeqCst);
                        let params = params.clone();
                        let session_cancel = cancel.child_token();
                        let active = Arc::clone(&active);
                        tracker.spawn(async move {
                            run_session(stream, peer, params, session_cancel).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(err) => {
                        warn!(%err, "accept failed");
                    }
                }
            }
        }
    }
    // The listening socket is dropped here, releasing the bound port.
}
