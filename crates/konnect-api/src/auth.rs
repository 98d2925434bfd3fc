use std::future::Future;

use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

/// A bearer token plus an optional absolute expiry timestamp.
///
/// One credential authenticates exactly one session: the connection manager
/// rebuilds the session whenever the credential is swapped.
#[derive(Debug, Clone)]
pub struct Credential {
    token: SecretString,
    /// Absolute expiry as seconds since the Unix epoch, when known.
    expires_at: Option<f64>,
}

impl Credential {
    pub fn new(token: impl Into<String>, expires_at: Option<f64>) -> Self {
        Self {
            token: token.into().into(),
            expires_at,
        }
    }

    /// The raw token material.
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Absolute expiry epoch, if the credential authority reported one.
    pub fn expires_at(&self) -> Option<f64> {
        self.expires_at
    }

    /// The `Authorization` header value for this credential.
    pub(crate) fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token.expose_secret())
    }
}

/// The credential authority: an async callback that produces a fresh
/// [`Credential`] whenever a refresh is needed.
///
/// The client never invokes `refresh` concurrently with a prior unresolved
/// call on the same instance; implementations only need to tolerate
/// sequential re-entry.
pub trait TokenSource: Send + Sync + 'static {
    fn refresh(&self) -> impl Future<Output = Result<Credential, Error>> + Send;
}
