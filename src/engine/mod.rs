//! Execution engine contract.
//!
//! The protocol core treats code execution as an external capability: it
//! hands the engine the submitted code, a cancellation token, and an ordered
//! sink for intermediate output, and waits for a final result. Sandboxing
//! and resource policy live entirely behind this trait.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{AppError, Result};

pub mod process;

pub use process::ProcessEngine;

/// Ordered sink for intermediate output chunks.
///
/// Chunks arrive on the wire in the exact order they are emitted. The sink
/// is backed by a bounded channel, so `emit` suspends when the session's
/// write path is saturated — backpressure against a slow client reaches all
/// the way into the engine.
#[derive(Debug, Clone)]
pub struct OutputSink {
    tx: mpsc::Sender<String>,
}

impl OutputSink {
    /// Wrap a chunk channel sender. Conventionally one chunk is one line of
    /// output, without its trailing newline.
    #[must_use]
    pub fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx }
    }

    /// Emit one output chunk.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Cancelled` when the receiving side is gone, which
    /// means the request is being torn down and the engine should stop.
    pub async fn emit(&self, chunk: impl Into<String>) -> Result<()> {
        self.tx
            .send(chunk.into())
            .await
            .map_err(|_| AppError::Cancelled("output channel closed".into()))
    }
}

/// Capability interface for whatever actually runs submitted code.
///
/// Implementations must honor `cancel` promptly — once the token fires no
/// orphaned work may remain — and must call `emit` in the exact order output
/// chunks occur.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Execute `code`, emitting intermediate output through `output`, and
    /// return the final output text (often empty when everything was
    /// emitted incrementally).
    ///
    /// # Errors
    ///
    /// Returns `AppError::Execution` when the code fails and
    /// `AppError::Cancelled` when execution was interrupted by `cancel`.
    async fn execute(
        &self,
        code: String,
        cancel: CancellationToken,
        output: OutputSink,
    ) -> Result<String>;
}
