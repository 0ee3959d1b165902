// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the session facade against a mock Stockroom server.
//!
//! The mock serves login, refresh, two API resources and the notification
//! stream on an ephemeral port.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{any, get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use stockroom_session::client::ApiRequest;
use stockroom_session::config::SessionConfig;
use stockroom_session::error::SessionError;
use stockroom_session::events::{RenewalTrigger, SessionEvent};
use stockroom_session::session::Session;

type ResourceFn = fn(Option<&str>) -> (u16, String);

struct MockState {
    login_status: u16,
    login_hint_secs: u64,
    refresh_replies: Vec<(u16, String)>,
    resource: ResourceFn,
    refresh_hits: AtomicU32,
    resource_hits: AtomicU32,
}

struct Mock {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl Mock {
    fn refresh_hits(&self) -> u32 {
        self.state.refresh_hits.load(Ordering::SeqCst)
    }

    fn resource_hits(&self) -> u32 {
        self.state.resource_hits.load(Ordering::SeqCst)
    }

    fn config(&self) -> SessionConfig {
        SessionConfig {
            api_url: format!("http://{}", self.addr),
            sign_in_url: Some("https://stockroom.test/sign-in".into()),
            reactive_first_delay_ms: 20,
            reactive_second_delay_ms: 10,
            reconnect_base_ms: 5,
            reconnect_cap_ms: 20,
            ..Default::default()
        }
    }
}

fn token_body(access: &str, refresh: &str) -> String {
    token_body_with_hint(access, refresh, 3600)
}

fn token_body_with_hint(access: &str, refresh: &str, hint_secs: u64) -> String {
    serde_json::json!({
        "accessToken": access,
        "refreshToken": refresh,
        "accessTokenLifetimeHint": hint_secs
    })
    .to_string()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn login(State(s): State<Arc<MockState>>) -> impl IntoResponse {
    if s.login_status != 200 {
        return (status(s.login_status), "denied".to_owned());
    }
    (StatusCode::OK, token_body_with_hint("a1", "r1", s.login_hint_secs))
}

async fn refresh(State(s): State<Arc<MockState>>) -> impl IntoResponse {
    let idx = s.refresh_hits.fetch_add(1, Ordering::SeqCst) as usize;
    let (code, body) = s
        .refresh_replies
        .get(idx)
        .or_else(|| s.refresh_replies.last())
        .cloned()
        .unwrap_or((500, String::new()));
    (status(code), body)
}

async fn items(State(s): State<Arc<MockState>>, headers: HeaderMap) -> impl IntoResponse {
    s.resource_hits.fetch_add(1, Ordering::SeqCst);
    let (code, body) = (s.resource)(bearer(&headers));
    (status(code), body)
}

async fn echo(method: Method, RawQuery(query): RawQuery, body: String) -> impl IntoResponse {
    let body: serde_json::Value = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
    axum::Json(serde_json::json!({
        "method": method.as_str(),
        "query": query,
        "body": body,
    }))
}

async fn stream() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        ": hello\n\nevent: notification\ndata: {\"id\":7}\n\n",
    )
}

fn mock_state(
    login_status: u16,
    refresh_replies: Vec<(u16, String)>,
    resource: ResourceFn,
) -> MockState {
    MockState {
        login_status,
        login_hint_secs: 3600,
        refresh_replies,
        resource,
        refresh_hits: AtomicU32::new(0),
        resource_hits: AtomicU32::new(0),
    }
}

async fn mock(
    login_status: u16,
    refresh_replies: Vec<(u16, String)>,
    resource: ResourceFn,
) -> anyhow::Result<Mock> {
    serve_mock(mock_state(login_status, refresh_replies, resource)).await
}

async fn serve_mock(state: MockState) -> anyhow::Result<Mock> {
    let state = Arc::new(state);
    let app = Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/api/items", any(items))
        .route("/api/echo", any(echo))
        .route("/notifications/stream", get(stream))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(Mock { addr, state })
}

async fn signed_in(mock: &Mock) -> anyhow::Result<Arc<Session>> {
    let session = Session::new(mock.config())?;
    session.login("clerk@stockroom.test", "hunter2").await?;
    Ok(session)
}

fn drain(rx: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn signed_out_count(events: &[SessionEvent]) -> usize {
    events.iter().filter(|e| matches!(e, SessionEvent::SignedOut { .. })).count()
}

fn only_a2(bearer: Option<&str>) -> (u16, String) {
    match bearer {
        Some("a2") => (200, r#"{"items":[1,2]}"#.to_owned()),
        _ => (401, "expired".to_owned()),
    }
}

// -- Happy path ----------------------------------------------------------------

#[tokio::test]
async fn authenticated_request_carries_bearer() -> anyhow::Result<()> {
    fn only_a1(bearer: Option<&str>) -> (u16, String) {
        match bearer {
            Some("a1") => (200, r#"{"items":[]}"#.to_owned()),
            _ => (401, String::new()),
        }
    }
    let mock = mock(200, vec![], only_a1).await?;
    let session = signed_in(&mock).await?;

    let body: serde_json::Value = session.client().get_json("/api/items").await?;
    assert_eq!(body["items"], serde_json::json!([]));
    assert_eq!(mock.refresh_hits(), 0);
    Ok(())
}

#[tokio::test]
async fn query_and_body_pass_through() -> anyhow::Result<()> {
    let mock = mock(200, vec![], only_a2).await?;
    let session = signed_in(&mock).await?;

    let request = ApiRequest::post("/api/echo", serde_json::json!({"sku": "A-1", "qty": 3}))
        .with_query("dry_run", "true");
    let body: serde_json::Value = session.execute(&request).await?.json()?;
    assert_eq!(body["method"], "POST");
    assert_eq!(body["query"], "dry_run=true");
    assert_eq!(body["body"]["qty"], 3);
    Ok(())
}

// -- Transparent renewal -------------------------------------------------------

#[tokio::test]
async fn rejected_request_is_retried_with_renewed_credential() -> anyhow::Result<()> {
    let mock = mock(200, vec![(200, token_body("a2", "r2"))], only_a2).await?;
    let session = signed_in(&mock).await?;
    let mut events = session.subscribe_events();

    let resp = session.execute(&ApiRequest::get("/api/items")).await?;
    assert_eq!(resp.status, 200);
    assert_eq!(mock.resource_hits(), 2);
    assert_eq!(mock.refresh_hits(), 1);
    assert_eq!(session.store().read().map(|c| c.access_token.clone()).as_deref(), Some("a2"));
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Renewed { trigger: RenewalTrigger::Reactive }]
    );
    Ok(())
}

#[tokio::test]
async fn status_498_is_treated_as_rejection() -> anyhow::Result<()> {
    fn only_a2_498(bearer: Option<&str>) -> (u16, String) {
        match bearer {
            Some("a2") => (200, "{}".to_owned()),
            _ => (498, "token expired".to_owned()),
        }
    }
    let mock = mock(200, vec![(200, token_body("a2", "r2"))], only_a2_498).await?;
    let session = signed_in(&mock).await?;

    let resp = session.execute(&ApiRequest::get("/api/items")).await?;
    assert_eq!(resp.status, 200);
    assert_eq!(mock.refresh_hits(), 1);
    Ok(())
}

#[tokio::test]
async fn request_is_retried_at_most_once() -> anyhow::Result<()> {
    fn always_401(_: Option<&str>) -> (u16, String) {
        (401, String::new())
    }
    let mock = mock(200, vec![(200, token_body("a2", "r2"))], always_401).await?;
    let session = signed_in(&mock).await?;
    let mut events = session.subscribe_events();

    let err = session.execute(&ApiRequest::get("/api/items")).await;
    assert_eq!(err.err(), Some(SessionError::AuthExpired));
    assert_eq!(mock.resource_hits(), 2, "first attempt plus one retry");
    assert_eq!(mock.refresh_hits(), 1);
    assert!(session.store().is_empty());
    assert_eq!(signed_out_count(&drain(&mut events)), 1);
    Ok(())
}

#[tokio::test]
async fn forced_refresh_renews_in_place() -> anyhow::Result<()> {
    let mock = mock(200, vec![(200, token_body("a2", "r2"))], only_a2).await?;
    let session = signed_in(&mock).await?;
    let mut events = session.subscribe_events();

    let renewed = session.refresh_now().await?;
    assert_eq!(renewed.access_token, "a2");
    assert_eq!(renewed.refresh_token, "r2");
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Renewed { trigger: RenewalTrigger::Manual }]
    );
    Ok(())
}

// -- Sign-out ------------------------------------------------------------------

#[tokio::test]
async fn concurrent_failures_sign_out_exactly_once() -> anyhow::Result<()> {
    let mock = mock(200, vec![(401, "refresh token revoked".to_owned())], only_a2).await?;
    let session = signed_in(&mock).await?;
    let mut events = session.subscribe_events();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let session = Arc::clone(&session);
        handles.push(tokio::spawn(async move {
            session.execute(&ApiRequest::get("/api/items")).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await?.err(), Some(SessionError::AuthExpired));
    }

    let events = drain(&mut events);
    assert_eq!(signed_out_count(&events), 1, "{events:?}");
    let Some(SessionEvent::SignedOut { redirect_to, .. }) =
        events.iter().find(|e| matches!(e, SessionEvent::SignedOut { .. }))
    else {
        anyhow::bail!("missing sign-out event");
    };
    assert_eq!(redirect_to, "https://stockroom.test/sign-in");
    assert!(!session.is_signed_in());
    Ok(())
}

#[tokio::test]
async fn refused_forced_refresh_signs_out_once() -> anyhow::Result<()> {
    let mock = mock(200, vec![(401, "refresh token revoked".to_owned())], only_a2).await?;
    let session = signed_in(&mock).await?;
    let mut events = session.subscribe_events();

    let err = session.refresh_now().await.err();
    assert!(matches!(err, Some(SessionError::RenewalFailed(ref msg)) if msg.contains("401")), "{err:?}");
    assert!(!session.is_signed_in());

    // Requests after the sign-out fail without another sign-out.
    let err = session.execute(&ApiRequest::get("/api/items")).await.err();
    assert_eq!(err, Some(SessionError::AuthExpired));
    assert_eq!(signed_out_count(&drain(&mut events)), 1);
    Ok(())
}

#[tokio::test]
async fn refused_proactive_renewal_signs_out_and_ticker_goes_quiet() -> anyhow::Result<()> {
    let mut state = mock_state(200, vec![(401, "refresh token revoked".to_owned())], only_a2);
    // Shorter than the refresh buffer, so every check wants to renew.
    state.login_hint_secs = 1;
    let mock = serve_mock(state).await?;
    let session = Session::new(SessionConfig { refresh_check_ms: 20, ..mock.config() })?;
    session.login("clerk@stockroom.test", "hunter2").await?;
    let mut events = session.subscribe_events();

    let cancel = tokio_util::sync::CancellationToken::new();
    let ticker = session.spawn_refresh_ticker(cancel.clone());
    tokio::time::sleep(Duration::from_millis(400)).await;
    cancel.cancel();
    ticker.await?;

    let events = drain(&mut events);
    assert_eq!(signed_out_count(&events), 1, "{events:?}");
    assert_eq!(mock.refresh_hits(), 1);
    assert!(!session.is_signed_in());
    Ok(())
}

#[tokio::test]
async fn request_without_credential_fails_without_sign_out() -> anyhow::Result<()> {
    let mock = mock(200, vec![], only_a2).await?;
    let session = Session::new(mock.config())?;
    let mut events = session.subscribe_events();

    let err = session.execute(&ApiRequest::get("/api/items")).await;
    assert_eq!(err.err(), Some(SessionError::AuthExpired));
    assert_eq!(mock.resource_hits(), 0);
    assert!(drain(&mut events).is_empty());
    Ok(())
}

#[tokio::test]
async fn login_after_sign_out_starts_new_lifecycle() -> anyhow::Result<()> {
    let mock = mock(200, vec![], only_a2).await?;
    let session = signed_in(&mock).await?;

    assert!(session.logout());
    assert!(!session.logout(), "second logout is a no-op");
    assert!(!session.is_signed_in());

    session.login("clerk@stockroom.test", "hunter2").await?;
    assert!(session.is_signed_in());
    assert!(session.logout(), "latch re-armed by login");
    Ok(())
}

// -- Errors --------------------------------------------------------------------

#[tokio::test]
async fn server_error_is_surfaced_without_renewal() -> anyhow::Result<()> {
    fn boom(_: Option<&str>) -> (u16, String) {
        (500, "boom".to_owned())
    }
    let mock = mock(200, vec![], boom).await?;
    let session = signed_in(&mock).await?;

    let err = session.execute(&ApiRequest::get("/api/items")).await.err();
    assert_eq!(err, Some(SessionError::Server { status: 500, body: "boom".to_owned() }));
    assert_eq!(mock.resource_hits(), 1);
    assert_eq!(mock.refresh_hits(), 0);
    assert!(session.is_signed_in());
    Ok(())
}

#[tokio::test]
async fn rejected_login_reports_status() -> anyhow::Result<()> {
    let mock = mock(403, vec![], only_a2).await?;
    let session = Session::new(mock.config())?;

    let err = session.login("clerk@stockroom.test", "wrong").await.err();
    assert_eq!(err, Some(SessionError::AuthRejected { status: 403 }));
    assert!(!session.is_signed_in());
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_refused() {
    let config = SessionConfig { api_url: "stockroom.test".into(), ..Default::default() };
    assert!(Session::new(config).is_err());
}

// -- Notifications -------------------------------------------------------------

#[tokio::test]
async fn notification_stream_feeds_push_receiver() -> anyhow::Result<()> {
    let mock = mock(200, vec![], only_a2).await?;
    let session = signed_in(&mock).await?;
    let mut push = session.subscribe_push();

    let subscription = session.subscribe_notifications();
    let event = tokio::time::timeout(Duration::from_secs(5), push.recv()).await??;
    assert_eq!(event.event, "notification");
    assert_eq!(event.json().map(|v| v["id"].clone()), Some(serde_json::json!(7)));

    subscription.unsubscribe().await;
    Ok(())
}

#[tokio::test]
async fn subscription_opened_before_login_connects_after_login() -> anyhow::Result<()> {
    let mock = mock(200, vec![], only_a2).await?;
    let session = Session::new(mock.config())?;
    let mut push = session.subscribe_push();

    let subscription = session.subscribe_notifications();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!subscription.is_finished());

    session.login("clerk@stockroom.test", "hunter2").await?;
    let event = tokio::time::timeout(Duration::from_secs(5), push.recv()).await??;
    assert_eq!(event.json().map(|v| v["id"].clone()), Some(serde_json::json!(7)));

    subscription.unsubscribe().await;
    Ok(())
}
