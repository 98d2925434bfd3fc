// Connection lifecycle management.
//
// One manager owns one live session at a time. Admission, reconnect, and
// close all funnel through the same barrier: `reconnecting` blocks new
// admissions, and reconnect/close wait for the in-flight count to drain
// before touching the session. The Python-condvar equivalent here is a
// tokio Mutex for the guarded state plus a Notify used as a broadcast
// wakeup, with `Notified::enable` registered before every state check so
// wakeups between check and await are not lost.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

use crate::auth::Credential;
use crate::error::Error;
use crate::session::{Connect, Session};

struct State<S> {
    session: Option<Arc<S>>,
    credential: Credential,
    reconnecting: bool,
    closed: bool,
}

struct Shared<S> {
    state: Mutex<State<S>>,
    /// In-flight operation count. Kept outside the mutex so release can
    /// run in a synchronous `Drop`; increments only happen under the mutex
    /// while `reconnecting` is false, which preserves admission atomicity.
    active: AtomicUsize,
    /// Broadcast wakeup for barrier transitions and drain-to-zero.
    cond: Notify,
}

/// Admission slot for one in-flight operation.
///
/// Derefs to the session it was admitted against. Dropping the handle
/// releases the slot on every exit path, success or failure, and wakes any
/// reconnect/close waiting for the count to reach zero.
pub struct SessionHandle<S> {
    session: Arc<S>,
    shared: Arc<Shared<S>>,
}

impl<S> Deref for SessionHandle<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S> Drop for SessionHandle<S> {
    fn drop(&mut self) {
        if self.shared.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.shared.cond.notify_waiters();
        }
    }
}

/// Owns the single live session and serializes connect/reconnect/close
/// against arbitrarily many concurrent operations.
///
/// Invariants:
/// - at most one live session exists at any instant;
/// - no session is torn down while any [`SessionHandle`] is outstanding;
/// - no handle is issued while a reconnect or close is in progress;
/// - at most one teardown-rebuild cycle executes at a time.
pub struct ConnectionManager<C: Connect> {
    connector: C,
    shared: Arc<Shared<C::Session>>,
}

impl<C: Connect> ConnectionManager<C> {
    pub fn new(connector: C, credential: Credential) -> Self {
        Self {
            connector,
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    session: None,
                    credential,
                    reconnecting: false,
                    closed: false,
                }),
                active: AtomicUsize::new(0),
                cond: Notify::new(),
            }),
        }
    }

    /// Admit one operation, connecting lazily if no session exists.
    ///
    /// Suspends while a reconnect or close is in progress; the handle is
    /// only returned once the barrier is clear, under the same lock that
    /// reconnect uses to raise it. The connect handshake runs while the
    /// lock is held, so concurrent first callers cannot double-connect.
    ///
    /// Connect failures propagate; the manager does not retry.
    pub async fn acquire(&self) -> Result<SessionHandle<C::Session>, Error> {
        loop {
            let notified = self.shared.cond.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(Error::Closed);
            }
            if state.reconnecting {
                drop(state);
                notified.await;
                continue;
            }

            let session = if let Some(session) = state.session.as_ref() {
                Arc::clone(session)
            } else {
                let session = Arc::new(self.connector.connect(&state.credential).await?);
                state.session = Some(Arc::clone(&session));
                session
            };

            self.shared.active.fetch_add(1, Ordering::AcqRel);
            return Ok(SessionHandle {
                session,
                shared: Arc::clone(&self.shared),
            });
        }
    }

    /// Swap in a new credential: drain in-flight operations, tear down the
    /// old session, and connect a replacement.
    ///
    /// Teardown failures are logged and swallowed — a failing close must
    /// never block establishment of the replacement session. A connect
    /// failure propagates and leaves the manager sessionless; the next
    /// `acquire` will attempt the handshake again under the stored
    /// credential.
    pub async fn reconnect(&self, credential: Credential) -> Result<(), Error> {
        let mut state = self.begin_exclusive().await?;
        state.credential = credential;
        drop(state);

        debug!("reconnect requested, waiting for in-flight operations");
        self.wait_drained().await;

        let old = self.shared.state.lock().await.session.take();
        if let Some(old) = old {
            // Outside the lock: unrelated release/acquire stay unblocked.
            if let Err(err) = old.close().await {
                debug!("error closing session during reconnect: {err}");
            }
        }

        let credential = self.shared.state.lock().await.credential.clone();
        let connected = self.connector.connect(&credential).await;

        let mut state = self.shared.state.lock().await;
        state.reconnecting = false;
        let result = match connected {
            Ok(session) => {
                state.session = Some(Arc::new(session));
                Ok(())
            }
            Err(err) => {
                warn!("reconnect handshake failed: {err}");
                Err(err)
            }
        };
        drop(state);
        self.shared.cond.notify_waiters();
        result
    }

    /// Tear down the session and refuse all further admissions.
    ///
    /// Reuses the reconnect barrier, waits for in-flight operations to
    /// drain, and is idempotent: a second close observes the `closed` flag
    /// and returns without touching the session again.
    pub async fn close(&self) {
        let Ok(state) = self.begin_exclusive().await else {
            // Already closed.
            return;
        };
        drop(state);

        self.wait_drained().await;

        let old = self.shared.state.lock().await.session.take();
        if let Some(old) = old {
            if let Err(err) = old.close().await {
                debug!("error closing session: {err}");
            }
        }

        let mut state = self.shared.state.lock().await;
        state.reconnecting = false;
        state.closed = true;
        drop(state);
        self.shared.cond.notify_waiters();
        debug!("connection manager closed");
    }

    /// Snapshot of the current credential.
    pub async fn credential(&self) -> Credential {
        self.shared.state.lock().await.credential.clone()
    }

    /// Raise the barrier, serializing against any other in-progress
    /// reconnect/close cycle. Returns with `reconnecting` set and the
    /// state lock held.
    async fn begin_exclusive(&self) -> Result<tokio::sync::MutexGuard<'_, State<C::Session>>, Error> {
        loop {
            let notified = self.shared.cond.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut state = self.shared.state.lock().await;
            if state.closed {
                return Err(Error::Closed);
            }
            if state.reconnecting {
                drop(state);
                notified.await;
                continue;
            }
            state.reconnecting = true;
            return Ok(state);
        }
    }

    /// Wait until no admission slots are outstanding. Holds no lock, so
    /// releases (which only touch the atomic and the Notify) are never
    /// blocked on us.
    async fn wait_drained(&self) {
        loop {
            let notified = self.shared.cond.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.shared.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}
