// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mock identity provider for unit tests.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::config::SessionConfig;

/// One refresh request as seen by the mock: bearer token and raw body.
#[derive(Debug, Clone)]
pub struct SeenRefresh {
    pub bearer: Option<String>,
    pub body: String,
}

pub struct MockIdentity {
    pub addr: SocketAddr,
    pub refresh_hits: Arc<AtomicU32>,
    pub seen: Arc<Mutex<Vec<SeenRefresh>>>,
}

impl MockIdentity {
    pub fn hits(&self) -> u32 {
        self.refresh_hits.load(Ordering::SeqCst)
    }

    /// Session config pointed at this mock with short reactive delays.
    pub fn config(&self) -> SessionConfig {
        SessionConfig {
            api_url: format!("http://{}", self.addr),
            reactive_first_delay_ms: 20,
            reactive_second_delay_ms: 10,
            access_token_lifetime: Duration::from_secs(5),
            ..Default::default()
        }
    }
}

/// Spawn a refresh endpoint that replays `responses` in order, repeating the
/// last one once exhausted.
pub async fn mock_identity(responses: Vec<(u16, String)>) -> anyhow::Result<MockIdentity> {
    mock_identity_delayed(responses, Duration::ZERO).await
}

/// Like [`mock_identity`], but every refresh answer is held back for `delay`.
pub async fn mock_identity_delayed(
    responses: Vec<(u16, String)>,
    delay: Duration,
) -> anyhow::Result<MockIdentity> {
    let refresh_hits = Arc::new(AtomicU32::new(0));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let responses = Arc::new(responses);

    let hits = Arc::clone(&refresh_hits);
    let seen_clone = Arc::clone(&seen);
    let app = Router::new().route(
        "/auth/refresh",
        post(move |headers: HeaderMap, body: String| {
            let hits = Arc::clone(&hits);
            let seen = Arc::clone(&seen_clone);
            let resps = Arc::clone(&responses);
            async move {
                let idx = hits.fetch_add(1, Ordering::SeqCst) as usize;
                let bearer = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.strip_prefix("Bearer "))
                    .map(str::to_owned);
                seen.lock().push(SeenRefresh { bearer, body });
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let (status, body) = resps
                    .get(idx)
                    .or_else(|| resps.last())
                    .cloned()
                    .unwrap_or((500, "{}".to_owned()));
                (StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), body)
            }
        }),
    );

    let addr = serve(app).await?;
    Ok(MockIdentity { addr, refresh_hits, seen })
}

/// Serve `app` on an ephemeral port.
pub async fn serve(app: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}

pub fn token_body(access: &str, refresh: &str) -> String {
    serde_json::json!({
        "accessToken": access,
        "refreshToken": refresh,
        "accessTokenLifetimeHint": 60
    })
    .to_string()
}

/// Plain reqwest client with the crypto provider installed.
pub fn http() -> reqwest::Client {
    crate::ensure_crypto();
    reqwest::Client::new()
}
