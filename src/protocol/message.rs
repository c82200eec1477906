//! Request and response types carried inside wire frames.

use serde::{Deserialize, Serialize};

/// Inbound client request.
///
/// `id` is client-assigned and must be unique per session while the request
/// is in flight; it may be reused once the request reaches a terminal state.
/// A request carrying only `id` and `token` is a pure authentication
/// handshake and executes nothing.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    /// Client-chosen correlation id, echoed on every response.
    pub id: String,
    /// Shared-secret token; required until the session is authenticated.
    pub token: Option<String>,
    /// Code to execute; its absence makes the request a handshake.
    pub code: Option<String>,
    /// Whether intermediate output chunks should be streamed.
    #[serde(default)]
    pub stream: bool,
}

/// Outbound response, one or more per accepted request.
///
/// `output` and `error` always serialise as explicit `null` when absent —
/// clients pattern-match on the full key set. Exactly one response per
/// request id carries `stream_end = true`, and it is always the last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Request id this response belongs to.
    pub id: String,
    /// Output text; a chunk for non-terminal responses, the collected or
    /// final result for terminal ones.
    pub output: Option<String>,
    /// Failure message; `None` on success.
    pub error: Option<String>,
    /// Marks the terminal response for the request id.
    pub stream_end: bool,
}

impl Response {
    /// Non-terminal streamed output chunk.
    #[must_use]
    pub fn chunk(id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            output: Some(output.into()),
            error: None,
            stream_end: false,
        }
    }

    /// Terminal success response.
    #[must_use]
    pub fn success(id: impl Into<String>, output: Option<String>) -> Self {
        Self {
            id: id.into(),
            output,
            error: None,
            stream_end: true,
        }
    }

    /// Terminal failure response; `output` may carry partial output that was
    /// already collected before the failure.
    #[must_use]
    pub fn failure(id: impl Into<String>, error: impl Into<String>, output: Option<String>) -> Self {
        Self {
            id: id.into(),
            output,
            error: Some(error.into()),
            stream_end: true,
        }
    }
}
