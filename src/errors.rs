//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Malformed, oversized, or truncated wire frame. Not recoverable at
    /// the protocol layer; the session carrying the frame is torn down.
    Frame(String),
    /// Missing or incorrect authentication token.
    Auth(String),
    /// A request id was reused while the original request is still in flight.
    DuplicateId(String),
    /// The execution engine reported a failure.
    Execution(String),
    /// The listener could not bind its address.
    Bind(String),
    /// A request was cancelled, typically because its session was torn down.
    Cancelled(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// The bare failure message, without the category prefix added by
    /// [`Display`]. This is the text placed in the `error` field of a wire
    /// response, where the client already knows the request context.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Config(msg)
            | Self::Frame(msg)
            | Self::Auth(msg)
            | Self::DuplicateId(msg)
            | Self::Execution(msg)
            | Self::Bind(msg)
            | Self::Cancelled(msg)
            | Self::Io(msg) => msg,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Frame(msg) => write!(f, "frame: {msg}"),
            Self::Auth(msg) => write!(f, "auth: {msg}"),
            Self::DuplicateId(msg) => write!(f, "duplicate id: {msg}"),
            Self::Execution(msg) => write!(f, "execution: {msg}"),
            Self::Bind(msg) => write!(f, "bind: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
