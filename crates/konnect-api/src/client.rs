// Konnect GraphQL client.
//
// Runs operations through the connection manager's admission protocol and
// handles credential refresh, both reactively (on 401) and proactively
// (timer-driven). Both paths funnel through the same serialized
// refresh-and-reconnect procedure.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::auth::{Credential, TokenSource};
use crate::connection::{ConnectionManager, SessionHandle};
use crate::error::Error;
use crate::queries;
use crate::refresh::RefreshScheduler;
use crate::session::{Connect, HttpConnector, Operation, Session};
use crate::transport::TransportConfig;

struct Inner<C: Connect, R> {
    manager: ConnectionManager<C>,
    token_source: R,
    scheduler: RefreshScheduler,
    /// Expiry supplied at construction; consumed when the first successful
    /// connect arms the initial proactive-refresh timer.
    initial_expiry: StdMutex<Option<f64>>,
    /// Serializes refresh-callback invocations: the reactive 401 path and a
    /// proactive firing must never call the credential authority
    /// concurrently.
    refresh_gate: Mutex<()>,
}

/// Persistent client for the Konnect GraphQL API.
///
/// Maintains one authenticated session shared by all concurrent operations
/// and refreshes the bearer token automatically — on HTTP 401, and via a
/// timer that fires five minutes before the token's known expiry.
pub struct KonnectClient<C: Connect, R: TokenSource> {
    inner: Arc<Inner<C, R>>,
}

impl<C: Connect, R: TokenSource> Clone for KonnectClient<C, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: TokenSource> KonnectClient<HttpConnector, R> {
    /// Client against the default Konnect endpoint.
    pub fn new(token: &str, expires_at: Option<f64>, token_source: R) -> Result<Self, Error> {
        Self::with_url(queries::GRAPHQL_URL, token, expires_at, token_source)
    }

    /// Client against a custom endpoint URL.
    pub fn with_url(
        url: &str,
        token: &str,
        expires_at: Option<f64>,
        token_source: R,
    ) -> Result<Self, Error> {
        let connector = HttpConnector::new(url, TransportConfig::default())?;
        Ok(Self::with_connector(
            connector,
            Credential::new(token, expires_at),
            token_source,
        ))
    }
}

impl<C: Connect, R: TokenSource> KonnectClient<C, R> {
    /// Client over an arbitrary session factory. This is the seam the
    /// tests use to substitute scripted sessions.
    pub fn with_connector(connector: C, credential: Credential, token_source: R) -> Self {
        let initial_expiry = credential.expires_at();
        Self {
            inner: Arc::new(Inner {
                manager: ConnectionManager::new(connector, credential),
                token_source,
                scheduler: RefreshScheduler::new(),
                initial_expiry: StdMutex::new(initial_expiry),
                refresh_gate: Mutex::new(()),
            }),
        }
    }

    /// Execute a GraphQL query.
    ///
    /// A 401-classified failure triggers exactly one token refresh,
    /// reconnect, and retried execution; any failure of the retry is
    /// reported as [`Error::RetryExhausted`]. All other failures are
    /// terminal for this call.
    pub async fn execute_query(
        &self,
        operation_name: &str,
        document: &str,
        variables: Option<Value>,
    ) -> Result<Value, Error> {
        let operation = Operation::new(operation_name, document, variables);
        self.execute(&operation).await
    }

    /// Execute a GraphQL mutation. Identical semantics to
    /// [`execute_query`](Self::execute_query) — same admission, retry, and
    /// error classification.
    pub async fn execute_mutation(
        &self,
        operation_name: &str,
        document: &str,
        variables: Option<Value>,
    ) -> Result<Value, Error> {
        self.execute_query(operation_name, document, variables).await
    }

    async fn execute(&self, operation: &Operation) -> Result<Value, Error> {
        let handle = self.acquire().await?;

        match handle.execute(operation).await {
            Ok(data) => Ok(data),
            Err(err) if err.is_auth_expired() => {
                debug!(
                    "token expired during {}, refreshing and retrying",
                    operation.operation_name
                );
                // Give the admission slot back before refreshing so the
                // reconnect barrier can drain to zero.
                drop(handle);
                self.retry_after_refresh(operation).await
            }
            Err(err) => {
                warn!("failed {}: {err}", operation.operation_name);
                Err(err)
            }
        }
    }

    /// The one-shot refresh-and-retry path. Every failure in here, refresh
    /// callback and reconnect included, becomes `RetryExhausted`; there is
    /// never a third attempt.
    async fn retry_after_refresh(&self, operation: &Operation) -> Result<Value, Error> {
        let name = &operation.operation_name;

        self.inner
            .refresh_and_reconnect()
            .await
            .map_err(|err| Error::retry_exhausted(name, err))?;

        let handle = self
            .acquire()
            .await
            .map_err(|err| Error::retry_exhausted(name, err))?;

        match handle.execute(operation).await {
            Ok(data) => Ok(data),
            Err(err) => {
                error!("retry after token refresh failed for {name}: {err}");
                Err(Error::retry_exhausted(name, err))
            }
        }
    }

    async fn acquire(&self) -> Result<SessionHandle<C::Session>, Error> {
        let handle = self.inner.manager.acquire().await?;

        // First successful connect arms the proactive timer if the
        // construction-time credential carried an expiry.
        let initial = self
            .inner
            .initial_expiry
            .lock()
            .expect("initial expiry lock poisoned")
            .take();
        if let Some(expires_at) = initial {
            self.inner.schedule_refresh(expires_at);
        }

        Ok(handle)
    }

    /// Snapshot of the credential currently bound to the session.
    pub async fn credential(&self) -> Credential {
        self.inner.manager.credential().await
    }

    /// Whether a proactive-refresh timer is currently armed.
    pub fn refresh_timer_armed(&self) -> bool {
        self.inner.scheduler.is_armed()
    }

    /// Cancel the refresh timer and close the session.
    ///
    /// Waits for in-flight operations to finish. Idempotent; after the
    /// first close, further operations fail with [`Error::Closed`].
    pub async fn close(&self) {
        self.inner.scheduler.cancel();
        self.inner.manager.close().await;
    }
}

impl<C: Connect, R: TokenSource> Inner<C, R> {
    /// Refresh the credential and rebuild the session, then re-arm the
    /// timer if the new credential's expiry is known. Shared by the
    /// reactive 401 path and proactive timer firings.
    async fn refresh_and_reconnect(self: &Arc<Self>) -> Result<(), Error> {
        let _gate = self.refresh_gate.lock().await;

        let credential = self.token_source.refresh().await?;
        let expires_at = credential.expires_at();
        self.manager.reconnect(credential).await?;

        if let Some(expires_at) = expires_at {
            self.schedule_refresh(expires_at);
        }
        Ok(())
    }

    fn schedule_refresh(self: &Arc<Self>, expires_at: f64) {
        // The timer task holds only a weak reference, so a dropped client
        // does not stay alive just to refresh a token nobody will use.
        let weak: Weak<Self> = Arc::downgrade(self);
        self.scheduler.schedule(expires_at, async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            debug!("proactive token refresh triggered");
            match inner.refresh_and_reconnect().await {
                Ok(()) => debug!("proactive token refresh completed"),
                // No caller to report to; degrade to reactive refresh on
                // the next 401.
                Err(err) => warn!("proactive token refresh failed: {err}"),
            }
        });
    }
}
