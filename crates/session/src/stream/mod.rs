// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated server-sent notification stream.
//!
//! A subscription runs one task through the connection state machine:
//!
//! ```text
//! Disconnected → Connecting → Open → Reconnecting → Connecting → …
//!                                   ↘ (attempts exhausted) Disconnected
//! any state → Aborted (unsubscribe)
//! ```
//!
//! Connection errors never reach the subscriber; they feed the backoff. A
//! missing credential leaves the stream `Disconnected` until a login or
//! renewal stores one.

pub mod backoff;
pub mod frame;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::credential::store::CredentialStore;
use crate::credential::Credential;
use crate::stream::backoff::Backoff;
use crate::stream::frame::{FrameDecoder, PushEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Disconnected,
    Connecting,
    Open,
    Reconnecting,
    Aborted,
}

/// Observable connection state of a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConnection {
    pub state: StreamState,
    pub attempt: u32,
    pub last_error: Option<String>,
}

impl StreamConnection {
    fn disconnected() -> Self {
        Self { state: StreamState::Disconnected, attempt: 0, last_error: None }
    }
}

/// Receives push events the consumer should treat as "cached data is stale".
pub trait CacheInvalidator: Send + Sync + 'static {
    fn invalidate(&self, event: &PushEvent);
}

impl CacheInvalidator for broadcast::Sender<PushEvent> {
    fn invalidate(&self, event: &PushEvent) {
        let _ = self.send(event.clone());
    }
}

struct StreamSettings {
    url: String,
    recognized: Vec<String>,
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

/// Opens and re-opens the notification stream with the stored credential.
#[derive(Clone)]
pub struct EventStreamClient {
    http: reqwest::Client,
    store: Arc<CredentialStore>,
    settings: Arc<StreamSettings>,
    sink: Arc<dyn CacheInvalidator>,
}

impl EventStreamClient {
    /// `http` must not carry a whole-request timeout; the stream is unbounded.
    pub fn new(
        http: reqwest::Client,
        store: Arc<CredentialStore>,
        config: &SessionConfig,
        sink: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let settings = StreamSettings {
            url: config.url(&config.stream_path),
            recognized: config
                .stream_events
                .iter()
                .map(|e| e.trim().to_owned())
                .filter(|e| !e.is_empty())
                .collect(),
            base: config.reconnect_base(),
            cap: config.reconnect_cap(),
            max_attempts: config.max_reconnect_attempts,
        };
        Self { http, store, settings: Arc::new(settings), sink }
    }

    /// Start a new subscription. Each call runs its own state machine.
    pub fn subscribe(&self) -> StreamSubscription {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(StreamConnection::disconnected());
        let task = StreamTask { client: self.clone(), cancel: cancel.clone(), state_tx };
        let handle = tokio::spawn(task.run());
        StreamSubscription { cancel, state_rx, handle: Some(handle) }
    }
}

/// Handle to a running subscription. Dropping it aborts the stream.
pub struct StreamSubscription {
    cancel: CancellationToken,
    state_rx: watch::Receiver<StreamConnection>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl StreamSubscription {
    pub fn state(&self) -> StreamConnection {
        self.state_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<StreamConnection> {
        self.state_rx.clone()
    }

    /// Whether the state machine has stopped (gave up or was aborted).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Abort the stream and wait for the task to stop. No dispatch or
    /// reconnect happens after this returns.
    pub async fn unsubscribe(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct StreamTask {
    client: EventStreamClient,
    cancel: CancellationToken,
    state_tx: watch::Sender<StreamConnection>,
}

impl StreamTask {
    async fn run(self) {
        let settings = Arc::clone(&self.client.settings);
        let mut backoff = Backoff::new(settings.base, settings.cap, settings.max_attempts);
        let mut last_error: Option<String> = None;
        let mut credentials = self.client.store.watch();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            // Mark the current generation seen before reading, so a write
            // racing the read still wakes the wait below.
            credentials.borrow_and_update();
            let credential = match self.client.store.read() {
                Some(credential) => credential,
                None => {
                    tracing::debug!("no credential, notification stream waiting for sign-in");
                    self.publish(StreamState::Disconnected, backoff.attempt(), last_error.clone());
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = credentials.changed() => continue,
                    }
                }
            };

            self.publish(StreamState::Connecting, backoff.attempt(), last_error.clone());
            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.connect(&credential) => result,
            };

            match connected {
                Ok(resp) => {
                    backoff.reset();
                    self.publish(StreamState::Open, 0, None);
                    tracing::info!(url = %settings.url, "notification stream open");

                    last_error = self.read_until_closed(resp).await;
                    if self.cancel.is_cancelled() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(err = %e, attempt = backoff.attempt(), "notification stream connect failed");
                    last_error = Some(e.to_string());
                }
            }

            let Some(delay) = backoff.next_delay() else {
                tracing::debug!(
                    attempts = backoff.attempt(),
                    "notification stream reconnect attempts exhausted"
                );
                self.publish(StreamState::Disconnected, backoff.attempt(), last_error);
                return;
            };

            tracing::debug!(delay_ms = delay.as_millis() as u64, attempt = backoff.attempt(), "notification stream reconnecting");
            self.publish(StreamState::Reconnecting, backoff.attempt(), last_error.clone());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.publish(StreamState::Aborted, backoff.attempt(), last_error);
        tracing::debug!("notification stream aborted");
    }

    async fn connect(&self, credential: &Credential) -> anyhow::Result<reqwest::Response> {
        let resp = self
            .client
            .http
            .get(&self.client.settings.url)
            .bearer_auth(&credential.access_token)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("stream rejected ({})", resp.status());
        }
        Ok(resp)
    }

    /// Read and dispatch frames until the body ends, errors, or the
    /// subscription is cancelled. Returns the reason the stream closed.
    async fn read_until_closed(&self, mut resp: reqwest::Response) -> Option<String> {
        let mut decoder = FrameDecoder::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                chunk = resp.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    for event in decoder.push(&bytes) {
                        if self.cancel.is_cancelled() {
                            return None;
                        }
                        self.dispatch(&event);
                    }
                }
                Ok(None) => {
                    tracing::debug!("notification stream ended");
                    return Some("stream ended".to_owned());
                }
                Err(e) => {
                    tracing::debug!(err = %e, "notification stream read failed");
                    return Some(e.to_string());
                }
            }
        }
    }

    fn dispatch(&self, event: &PushEvent) {
        if self.client.settings.recognized.iter().any(|e| *e == event.event) {
            tracing::debug!(event = %event.event, "push event, invalidating cache");
            self.client.sink.invalidate(event);
        } else {
            tracing::debug!(event = %event.event, "ignoring unrecognized push event");
        }
    }

    fn publish(&self, state: StreamState, attempt: u32, last_error: Option<String>) {
        self.state_tx.send_replace(StreamConnection { state, attempt, last_error });
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
