#![allow(clippy::unwrap_used)]
// End-to-end behavior of the KonnectClient: refresh-and-retry, terminal
// errors, and the proactive refresh timer (paused clock).

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use secrecy::ExposeSecret;
use serde_json::json;
use tokio_test::assert_err;

use common::{MockConnector, StaticTokenSource, Step, epoch_now};
use konnect_api::{Credential, Error, KonnectClient};

fn client(
    connector: MockConnector,
    token_source: StaticTokenSource,
) -> KonnectClient<MockConnector, StaticTokenSource> {
    KonnectClient::with_connector(connector, Credential::new("T1", None), token_source)
}

async fn yield_a_bit() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn query_returns_data_and_connects_once() {
    let connector = MockConnector::scripted([Step::Data(json!({"a": 1}))]);
    let log = Arc::clone(&connector.log);
    let client = client(connector, StaticTokenSource::new("T2", None));

    let result = client.execute_query("op", "query { a }", None).await.unwrap();

    assert_eq!(result, json!({"a": 1}));
    assert_eq!(log.connects.load(Ordering::SeqCst), 1);
    assert!(!client.refresh_timer_armed(), "no expiry, no timer");
    client.close().await;
}

#[tokio::test]
async fn auth_failure_refreshes_and_retries_once() {
    let connector = MockConnector::scripted([
        Step::AuthExpired,
        Step::Data(json!({"ok": true})),
    ]);
    let log = Arc::clone(&connector.log);
    let source = StaticTokenSource::new("T2", None);
    let refreshes = Arc::clone(&source.refreshes);
    let client = client(connector, source);

    let result = client.execute_query("op", "query { ok }", None).await.unwrap();

    assert_eq!(result, json!({"ok": true}));
    assert_eq!(log.executes.load(Ordering::SeqCst), 2);
    assert_eq!(log.closes.load(Ordering::SeqCst), 1, "exactly one reconnect");
    assert_eq!(log.connects.load(Ordering::SeqCst), 2);
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(client.credential().await.token().expose_secret(), "T2");
    client.close().await;
}

#[tokio::test]
async fn second_auth_failure_exhausts_the_retry() {
    let connector = MockConnector::scripted([Step::AuthExpired, Step::AuthExpired]);
    let log = Arc::clone(&connector.log);
    let source = StaticTokenSource::new("T2", None);
    let refreshes = Arc::clone(&source.refreshes);
    let client = client(connector, source);

    let err = assert_err!(client.execute_query("op", "query { ok }", None).await);

    assert!(matches!(err, Error::RetryExhausted { .. }));
    assert_eq!(log.executes.load(Ordering::SeqCst), 2, "no third attempt");
    assert_eq!(log.closes.load(Ordering::SeqCst), 1, "exactly one reconnect attempt");
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    client.close().await;
}

#[tokio::test]
async fn refresh_callback_failure_exhausts_the_retry() {
    let connector = MockConnector::scripted([Step::AuthExpired]);
    let log = Arc::clone(&connector.log);
    let client = client(connector, StaticTokenSource::failing());

    let result = client.execute_query("op", "query { ok }", None).await;

    assert!(matches!(result, Err(Error::RetryExhausted { .. })));
    assert_eq!(log.closes.load(Ordering::SeqCst), 0, "no reconnect without a new token");
    client.close().await;
}

#[tokio::test]
async fn non_auth_errors_are_terminal() {
    let connector = MockConnector::scripted([Step::Server(500)]);
    let log = Arc::clone(&connector.log);
    let source = StaticTokenSource::new("T2", None);
    let refreshes = Arc::clone(&source.refreshes);
    let client = client(connector, source);

    let result = client.execute_query("op", "query { ok }", None).await;

    assert!(matches!(result, Err(Error::Server { status: 500, .. })));
    assert_eq!(log.executes.load(Ordering::SeqCst), 1);
    assert_eq!(refreshes.load(Ordering::SeqCst), 0);
    client.close().await;
}

#[tokio::test]
async fn protocol_errors_are_terminal() {
    let connector = MockConnector::scripted([Step::Protocol("Cannot query field")]);
    let log = Arc::clone(&connector.log);
    let client = client(connector, StaticTokenSource::new("T2", None));

    let result = client.execute_query("op", "query { nope }", None).await;

    assert!(matches!(result, Err(Error::Protocol { .. })));
    assert_eq!(log.executes.load(Ordering::SeqCst), 1);
    client.close().await;
}

#[tokio::test]
async fn mutation_follows_the_query_path() {
    let connector = MockConnector::scripted([
        Step::AuthExpired,
        Step::Data(json!({"done": true})),
    ]);
    let log = Arc::clone(&connector.log);
    let client = client(connector, StaticTokenSource::new("T2", None));

    let result = client
        .execute_mutation("mutate", "mutation { done }", Some(json!({"id": "1"})))
        .await
        .unwrap();

    assert_eq!(result, json!({"done": true}));
    assert_eq!(log.executes.load(Ordering::SeqCst), 2);
    client.close().await;
}

#[tokio::test]
async fn concurrent_queries_share_one_connect() {
    let connector = MockConnector::new();
    let log = Arc::clone(&connector.log);
    let client = client(connector, StaticTokenSource::new("T2", None));

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            client.execute_query("op", "query { a }", None).await.unwrap()
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(log.connects.load(Ordering::SeqCst), 1);
    assert_eq!(log.executes.load(Ordering::SeqCst), 5);
    client.close().await;
}

// ── Proactive refresh timer ─────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn initial_expiry_arms_timer_after_first_connect() {
    let connector = MockConnector::new();
    let client = KonnectClient::with_connector(
        connector,
        Credential::new("T1", Some(epoch_now() + 100_000.0)),
        StaticTokenSource::new("T2", None),
    );

    assert!(!client.refresh_timer_armed(), "timer armed before first connect");

    client.execute_query("op", "query { a }", None).await.unwrap();
    assert!(client.refresh_timer_armed());

    client.close().await;
    assert!(!client.refresh_timer_armed(), "close left the timer armed");
}

#[tokio::test(start_paused = true)]
async fn proactive_refresh_fires_lead_time_before_expiry() {
    let connector = MockConnector::new();
    let log = Arc::clone(&connector.log);
    let source = StaticTokenSource::new("T2", None);
    let refreshes = Arc::clone(&source.refreshes);
    let client = KonnectClient::with_connector(
        connector,
        Credential::new("T1", Some(epoch_now() + 1_000.0)),
        source,
    );

    // First connect arms the timer for ~700s out (1000s - 300s lead).
    client.execute_query("op", "query { a }", None).await.unwrap();

    tokio::time::advance(Duration::from_secs(600)).await;
    yield_a_bit().await;
    assert_eq!(refreshes.load(Ordering::SeqCst), 0, "refresh fired too early");

    tokio::time::advance(Duration::from_secs(150)).await;
    yield_a_bit().await;
    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(log.connects.load(Ordering::SeqCst), 2);
    assert_eq!(client.credential().await.token().expose_secret(), "T2");
    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn proactive_refresh_rearms_for_the_next_expiry() {
    let connector = MockConnector::new();
    let source = StaticTokenSource::new("T2", Some(epoch_now() + 100_000.0));
    let refreshes = Arc::clone(&source.refreshes);
    let client = KonnectClient::with_connector(
        connector,
        Credential::new("T1", Some(epoch_now() + 1_000.0)),
        source,
    );

    client.execute_query("op", "query { a }", None).await.unwrap();

    // The firing task re-arms the timer mid-flight and must still finish
    // its own refresh cycle.
    tokio::time::advance(Duration::from_secs(750)).await;
    yield_a_bit().await;

    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(client.credential().await.token().expose_secret(), "T2");
    assert!(client.refresh_timer_armed(), "fire with a known expiry should re-arm");
    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn expiry_inside_lead_window_refreshes_immediately() {
    let connector = MockConnector::new();
    let log = Arc::clone(&connector.log);
    let source = StaticTokenSource::new("T2", None);
    let refreshes = Arc::clone(&source.refreshes);
    let client = KonnectClient::with_connector(
        connector,
        Credential::new("T1", Some(epoch_now() + 200.0)),
        source,
    );

    client.execute_query("op", "query { a }", None).await.unwrap();
    yield_a_bit().await;

    assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    assert_eq!(log.connects.load(Ordering::SeqCst), 2);
    client.close().await;
}

#[tokio::test(start_paused = true)]
async fn refresh_rearms_timer_when_new_expiry_is_known() {
    let connector = MockConnector::scripted([Step::AuthExpired, Step::Data(json!({}))]);
    let source = StaticTokenSource::new("T2", Some(epoch_now() + 100_000.0));
    let client = client(connector, source);

    client.execute_query("op", "query { a }", None).await.unwrap();

    assert!(
        client.refresh_timer_armed(),
        "refresh with a known expiry should re-arm the timer"
    );
    client.close().await;
}
