// Transport configuration for building reqwest::Client instances.
//
// Every (re)connect builds a fresh client so the Authorization header is
// recomputed from the current credential.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};

use crate::auth::Credential;
use crate::error::Error;

/// Transport settings shared by every session the client establishes.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` authenticated as `credential`.
    ///
    /// The bearer header is injected as a sensitive default header so it
    /// rides along on every request without being logged.
    pub fn build_client(&self, credential: &Credential) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&credential.bearer_header()).map_err(|e| {
            Error::InvalidCredential {
                message: format!("token is not a valid header value: {e}"),
            }
        })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!("konnect-api/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(Error::Transport)
    }
}
