#![allow(dead_code)]
#![allow(clippy::unwrap_used)]
// Scripted mock connector/session shared by the integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use secrecy::ExposeSecret;
use serde_json::{Value, json};

use konnect_api::{Connect, Credential, Error, Operation, Session, TokenSource};

/// One scripted outcome for a mock execute call.
pub enum Step {
    Data(Value),
    AuthExpired,
    Server(u16),
    Protocol(&'static str),
}

impl Step {
    fn into_result(self, operation: &Operation) -> Result<Value, Error> {
        match self {
            Step::Data(value) => Ok(value),
            Step::AuthExpired => Err(Error::AuthExpired),
            Step::Server(status) => Err(Error::Server {
                status,
                message: "mock server failure".into(),
            }),
            Step::Protocol(message) => Err(Error::Protocol {
                operation: operation.operation_name.clone(),
                message: message.into(),
            }),
        }
    }
}

/// Counters observed by the tests.
#[derive(Default)]
pub struct MockLog {
    pub connects: AtomicUsize,
    pub executes: AtomicUsize,
    pub closes: AtomicUsize,
    /// Token seen by each connect attempt, in order.
    pub tokens: Mutex<Vec<String>>,
}

pub struct MockConnector {
    pub log: Arc<MockLog>,
    script: Arc<Mutex<VecDeque<Step>>>,
    fail_connects: AtomicUsize,
    fail_close: bool,
}

impl MockConnector {
    /// Connector whose sessions answer every execute with `Ok({})`.
    pub fn new() -> Self {
        Self::scripted([])
    }

    /// Connector whose sessions pop one scripted step per execute call
    /// (shared across reconnects), falling back to `Ok({})`.
    pub fn scripted(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            log: Arc::new(MockLog::default()),
            script: Arc::new(Mutex::new(steps.into_iter().collect())),
            fail_connects: AtomicUsize::new(0),
            fail_close: false,
        }
    }

    /// Fail the next `n` connect attempts with a server error.
    #[must_use]
    pub fn fail_next_connects(self, n: usize) -> Self {
        self.fail_connects.store(n, Ordering::SeqCst);
        self
    }

    /// Make every session close return an error.
    #[must_use]
    pub fn failing_close(mut self) -> Self {
        self.fail_close = true;
        self
    }
}

impl Connect for MockConnector {
    type Session = MockSession;

    async fn connect(&self, credential: &Credential) -> Result<MockSession, Error> {
        let attempt = self.log.connects.fetch_add(1, Ordering::SeqCst) + 1;
        self.log
            .tokens
            .lock()
            .unwrap()
            .push(credential.token().expose_secret().to_owned());

        loop {
            let remaining = self.fail_connects.load(Ordering::SeqCst);
            if remaining == 0 {
                break;
            }
            if self
                .fail_connects
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Err(Error::Server {
                    status: 503,
                    message: "mock connect refused".into(),
                });
            }
        }

        Ok(MockSession {
            id: attempt,
            log: Arc::clone(&self.log),
            script: Arc::clone(&self.script),
            fail_close: self.fail_close,
        })
    }
}

pub struct MockSession {
    /// Connect attempt number this session came from (1-based).
    pub id: usize,
    log: Arc<MockLog>,
    script: Arc<Mutex<VecDeque<Step>>>,
    fail_close: bool,
}

impl Session for MockSession {
    async fn execute(&self, operation: &Operation) -> Result<Value, Error> {
        self.log.executes.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(step) => step.into_result(operation),
            None => Ok(json!({})),
        }
    }

    async fn close(&self) -> Result<(), Error> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(Error::Server {
                status: 500,
                message: "mock close failure".into(),
            })
        } else {
            Ok(())
        }
    }
}

/// Token source returning a fixed replacement credential.
pub struct StaticTokenSource {
    token: String,
    expires_at: Option<f64>,
    fail: bool,
    pub refreshes: Arc<AtomicUsize>,
}

impl StaticTokenSource {
    pub fn new(token: &str, expires_at: Option<f64>) -> Self {
        Self {
            token: token.to_owned(),
            expires_at,
            fail: false,
            refreshes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Source whose refresh calls always fail.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("unused", None)
        }
    }
}

impl TokenSource for StaticTokenSource {
    async fn refresh(&self) -> Result<Credential, Error> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Server {
                status: 503,
                message: "refresh unavailable".into(),
            });
        }
        Ok(Credential::new(self.token.clone(), self.expires_at))
    }
}

/// Current time as seconds since the Unix epoch.
pub fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}
