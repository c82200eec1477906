//! Authentication gate for session requests.
//!
//! A session starts unauthenticated. The first request presenting the
//! configured token flips it to authenticated; that same request may also
//! carry code, which then executes in the same evaluation. Rejections are
//! surfaced as terminal error responses — the connection stays open so the
//! client can retry with a corrected token.

use sha2::{Digest, Sha256};

use crate::protocol::message::Request;

/// Outcome of evaluating a request against the session's auth state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// The request may proceed; auth state is unchanged.
    Granted,
    /// The presented token matched; the session transitions to
    /// authenticated and the request proceeds.
    GrantedNewAuth,
    /// The request is rejected with the given reason. No code runs.
    Denied(String),
}

/// Validates tokens against the configured shared secret.
#[derive(Debug, Clone)]
pub struct AuthGate {
    require_token: bool,
    token: Option<String>,
}

impl AuthGate {
    /// Create a gate. With `require_token = false` every request is
    /// authenticated. A required gate with no configured token accepts any
    /// presented token (but still demands that one is presented).
    #[must_use]
    pub fn new(require_token: bool, token: Option<String>) -> Self {
        Self {
            require_token,
            token,
        }
    }

    /// Evaluate `request` for a session whose current auth state is
    /// `authenticated`.
    #[must_use]
    pub fn check(&self, authenticated: bool, request: &Request) -> AuthDecision {
        if !self.require_token || authenticated {
            return AuthDecision::Granted;
        }

        let Some(ref provided) = request.token else {
            return AuthDecision::Denied("authentication required".into());
        };

        match self.token {
            Some(ref expected) if !constant_time_eq(provided, expected) => {
                AuthDecision::Denied("authentication failed: invalid token".into())
            }
            _ => AuthDecision::GrantedNewAuth,
        }
    }
}

/// Constant-time string comparison via SHA-256 digests.
///
/// Comparing digests rather than the raw strings keeps the running time
/// independent of both content and length of the presented token.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
