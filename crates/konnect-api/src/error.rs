use thiserror::Error;

/// Top-level error type for the `konnect-api` crate.
///
/// Covers every failure mode of the client: authentication expiry, server
/// and GraphQL-level failures, transport problems, and the terminal state
/// of the one-shot refresh retry.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The bearer token was rejected (HTTP 401). Triggers the one-shot
    /// refresh-and-retry cycle; never surfaced to operation callers.
    #[error("authentication expired (HTTP 401)")]
    AuthExpired,

    /// Credential material could not be turned into a request header.
    #[error("invalid credential: {message}")]
    InvalidCredential { message: String },

    // ── Remote failures ─────────────────────────────────────────────
    /// Non-auth HTTP failure from the endpoint. Terminal for this call.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// GraphQL-level errors in the response envelope (malformed operation
    /// or server-side validation failure). Terminal for this call.
    #[error("GraphQL errors in {operation}: {message}")]
    Protocol { operation: String, message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, timeout, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ── Retry ───────────────────────────────────────────────────────
    /// The retried attempt after a token refresh also failed. The client
    /// never makes a third attempt.
    #[error("retry after token refresh failed for {operation}: {source}")]
    RetryExhausted {
        operation: String,
        #[source]
        source: Box<Error>,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Lifecycle ───────────────────────────────────────────────────
    /// The client has been closed; no further operations are admitted.
    #[error("client is closed")]
    Closed,
}

impl Error {
    /// Wrap a retry-path failure in [`Error::RetryExhausted`].
    pub(crate) fn retry_exhausted(operation: &str, source: Error) -> Self {
        Self::RetryExhausted {
            operation: operation.to_owned(),
            source: Box::new(source),
        }
    }

    /// Returns `true` if this error indicates the credential has expired
    /// and a refresh-and-retry cycle might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// Returns `true` if this is a transient transport error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
