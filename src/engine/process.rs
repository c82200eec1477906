//! Interpreter subprocess engine.
//!
//! Pipes submitted code into a configured interpreter's stdin and relays
//! its stdout line-by-line through the output sink. The child is spawned
//! with `kill_on_drop(true)` so an engine task that dies cannot leave a
//! stray interpreter behind; cancellation kills the child explicitly.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::engine::{ExecutionEngine, OutputSink};
use crate::{AppError, Result};

/// Engine that executes code by piping it into an interpreter subprocess.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    command: String,
    args: Vec<String>,
}

impl ProcessEngine {
    /// Create an engine for the given interpreter command line.
    #[must_use]
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }

    /// Create an engine from the `[engine]` configuration section.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.command.clone(), config.args.clone())
    }
}

#[async_trait]
impl ExecutionEngine for ProcessEngine {
    async fn execute(
        &self,
        code: String,
        cancel: CancellationToken,
        output: OutputSink,
    ) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::Execution(format!(
                    "failed to spawn interpreter '{}': {err}",
                    self.command
                ))
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AppError::Execution("failed to capture interpreter stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Execution("failed to capture interpreter stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Execution("failed to capture interpreter stderr".into()))?;

        // Write the code, then close stdin so the interpreter sees EOF.
        stdin
            .write_all(code.as_bytes())
            .await
            .map_err(|err| AppError::Execution(format!("failed to write code: {err}")))?;
        drop(stdin);

        // Drain stderr concurrently; a full pipe would wedge the child.
        let stderr_task = tokio::spawn(async move {
            let mut buf = String::new();
            let mut reader = BufReader::new(stderr);
            if let Err(err) = reader.read_to_string(&mut buf).await {
                warn!(%err, "failed to drain interpreter stderr");
            }
            buf
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("cancellation received, killing interpreter");
                    child.kill().await.ok();
                    stderr_task.abort();
                    return Err(AppError::Cancelled("execution cancelled".into()));
                }

                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => output.emit(line).await?,
                        Ok(None) => break,
                        Err(err) => {
                            child.kill().await.ok();
                            stderr_task.abort();
                            return Err(AppError::Execution(format!(
                                "failed to read interpreter output: {err}"
                            )));
                        }
                    }
                }
            }
        }

        let status = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                child.kill().await.ok();
                stderr_task.abort();
                return Err(AppError::Cancelled("execution cancelled".into()));
            }

            status = child.wait() => status.map_err(|err| {
                AppError::Execution(format!("failed to wait for interpreter: {err}"))
            })?,
        };

        let stderr_text = stderr_task.await.unwrap_or_default();

        if status.success() {
            // All output has already gone through the sink.
            Ok(String::new())
        } else {
            let detail = if stderr_text.trim().is_empty() {
                format!("interpreter exited with {status}")
            } else {
                stderr_text.trim_end().to_owned()
            };
            Err(AppError::Execution(detail))
        }
    }
}
