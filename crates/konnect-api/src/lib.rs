//! Async Rust client for the Andersen EV Konnect GraphQL API.
//!
//! The crate is built around three pieces:
//!
//! - **[`ConnectionManager`]** — owns the single live session and
//!   serializes connect/reconnect/close against arbitrarily many concurrent
//!   operations via an admission barrier. No session is ever torn down
//!   while an operation is in flight, and no operation is admitted while a
//!   reconnect is in progress.
//!
//! - **[`KonnectClient`]** — runs queries and mutations through the
//!   admission protocol and refreshes the bearer token automatically:
//!   reactively on HTTP 401 (refresh, reconnect, retry exactly once) and
//!   proactively via a [`RefreshScheduler`] timer that fires five minutes
//!   before the token's known expiry.
//!
//! - **[`KonnectDevice`]** — charger-level operations (status polling,
//!   commands, charge logs) as thin callers over the client.
//!
//! Credential acquisition is delegated to an injected [`TokenSource`]; the
//! wire layer is behind the [`Connect`]/[`Session`] traits so tests can
//! substitute scripted sessions.

pub mod auth;
pub mod client;
pub mod connection;
pub mod device;
pub mod error;
pub mod queries;
pub mod refresh;
pub mod session;
pub mod transport;

pub use auth::{Credential, TokenSource};
pub use client::KonnectClient;
pub use connection::{ConnectionManager, SessionHandle};
pub use device::{ChargeSummary, KonnectDevice};
pub use error::Error;
pub use refresh::{REFRESH_LEAD_SECS, RefreshScheduler};
pub use session::{Connect, HttpConnector, HttpSession, Operation, Session};
pub use transport::TransportConfig;
