//! Shared fixtures for the protocol integration tests.
//!
//! Starts a real listener on an ephemeral port with a scripted mock engine,
//! and provides raw frame I/O helpers so the tests exercise the wire format
//! byte for byte.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use remote_eval::config::{EngineConfig, ServerConfig};
use remote_eval::engine::{ExecutionEngine, OutputSink};
use remote_eval::server::listener::Listener;
use remote_eval::{AppError, Result};

/// How long frame reads may block before a test is considered hung.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Scripted engine driven by the submitted code string:
///
/// - `"1+1"` → returns `"2"`.
/// - `"emit a,b,c"` → emits each comma-separated chunk, returns `""`.
/// - `"slow"` → sleeps 300 ms, then returns `"done"`.
/// - `"hang"` → waits for cancellation, then fails as cancelled.
/// - `"boom"` → fails with an execution error.
/// - anything else → echoes the code back uppercased.
pub struct MockEngine {
    /// Number of times `execute` was entered.
    pub calls: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new() -> (Arc<Self>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Arc::new(Self {
                calls: Arc::clone(&calls),
            }),
            calls,
        )
    }
}

#[async_trait]
impl ExecutionEngine for MockEngine {
    async fn execute(
        &self,
        code: String,
        cancel: CancellationToken,
        output: OutputSink,
    ) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        match code.as_str() {
            "1+1" => Ok("2".into()),
            "boom" => Err(AppError::Execution("intentional failure".into())),
            "hang" => {
                cancel.cancelled().await;
                Err(AppError::Cancelled("execution cancelled".into()))
            }
            "slow" => {
                tokio::select! {
                    () = cancel.cancelled() => {
                        Err(AppError::Cancelled("execution cancelled".into()))
                    }
                    () = tokio::time::sleep(Duration::from_millis(300)) => Ok("done".into()),
                }
            }
            other if other.starts_with("emit ") => {
                for chunk in other.trim_start_matches("emit ").split(',') {
                    output.emit(chunk).await?;
                }
                Ok(String::new())
            }
            other => Ok(other.to_uppercase()),
        }
    }
}

/// Server configuration bound to an ephemeral loopback port.
///
/// The `[engine]` section is inert — the tests inject a [`MockEngine`]
/// directly into the listener.
pub fn test_config(require_token: bool, token: Option<&str>, max_connections: u32) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        require_token,
        token: token.map(str::to_owned),
        max_connections,
        idle_timeout_seconds: 0,
        max_frame_bytes: 65_536,
        engine: EngineConfig {
            command: "unused".into(),
            args: vec![],
        },
    }
}

/// Start a listener with a fresh mock engine. Returns the listener and the
/// engine's call counter.
pub async fn start_server(
    require_token: bool,
    token: Option<&str>,
    max_connections: u32,
) -> (Listener, Arc<AtomicUsize>) {
    let (engine, calls) = MockEngine::new();
    let listener = Listener::start(test_config(require_token, token, max_connections), engine)
        .await
        .expect("listener starts");
    (listener, calls)
}

/// Connect to a running test listener.
pub async fn connect(listener: &Listener) -> TcpStream {
    TcpStream::connect(listener.local_addr())
        .await
        .expect("client connects")
}

/// Write one length-prefixed JSON frame.
pub async fn send_frame(stream: &mut TcpStream, payload: &Value) {
    let bytes = serde_json::to_vec(payload).expect("serialise frame");
    let declared = u32::try_from(bytes.len()).expect("frame fits u32");
    stream
        .write_all(&declared.to_be_bytes())
        .await
        .expect("write prefix");
    stream.write_all(&bytes).await.expect("write payload");
}

/// Read one length-prefixed JSON frame, failing the test on timeout.
pub async fn recv_frame(stream: &mut TcpStream) -> Value {
    tokio::time::timeout(RECV_TIMEOUT, read_frame(stream))
        .await
        .expect("response before timeout")
}

async fn read_frame(stream: &mut TcpStream) -> Value {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.expect("read prefix");
    let declared = usize::try_from(u32::from_be_bytes(prefix)).expect("length fits usize");

    let mut payload = vec![0u8; declared];
    stream.read_exact(&mut payload).await.expect("read payload");
    serde_json::from_slice(&payload).expect("payload is JSON")
}

/// Assert that the server has closed the connection. A reset counts as
/// closed: the peer may drop the socket with unread bytes still buffered.
pub async fn expect_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let outcome = tokio::time::timeout(RECV_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("eof before timeout");
    match outcome {
        Ok(0) | Err(_) => {}
        Ok(n) => panic!("expected end-of-stream, got {n} byte(s)"),
    }
}

/// Pure authentication handshake frame.
pub fn auth_frame(id: &str, token: &str) -> Value {
    json!({ "id": id, "token": token })
}

/// Code execution frame.
pub fn exec_frame(id: &str, code: &str, stream: bool) -> Value {
    json!({ "id": id, "code": code, "stream": stream })
}

/// Authenticate `stream` with `token`, consuming the handshake response.
pub async fn authenticate(stream: &mut TcpStream, token: &str) {
    send_frame(stream, &auth_frame("auth", token)).await;
    let response = recv_frame(stream).await;
    assert_eq!(
        response,
        json!({ "id": "auth", "output": null, "error": null, "stream_end": true }),
        "handshake must succeed"
    );
}
