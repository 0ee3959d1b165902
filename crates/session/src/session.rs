// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session facade: wires the store, refresh orchestrator, logout guard,
//! request executor and notification stream around one configuration.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::{ApiRequest, ApiResponse, AuthenticatedClient};
use crate::config::SessionConfig;
use crate::credential::identity::IdentityClient;
use crate::credential::refresh::{spawn_refresh_ticker, RefreshOrchestrator};
use crate::credential::store::CredentialStore;
use crate::credential::{epoch_ms, Credential};
use crate::error::SessionError;
use crate::events::{RenewalTrigger, SessionEvent};
use crate::logout::LogoutGuard;
use crate::stream::frame::PushEvent;
use crate::stream::{EventStreamClient, StreamSubscription};

pub struct Session {
    config: SessionConfig,
    store: Arc<CredentialStore>,
    guard: Arc<LogoutGuard>,
    orchestrator: Arc<RefreshOrchestrator>,
    client: AuthenticatedClient,
    stream: EventStreamClient,
    event_tx: broadcast::Sender<SessionEvent>,
    push_tx: broadcast::Sender<PushEvent>,
}

impl Session {
    /// Validate `config` and build every component. No network traffic
    /// happens until [`Session::login`].
    pub fn new(config: SessionConfig) -> anyhow::Result<Arc<Self>> {
        config.validate()?;
        crate::ensure_crypto();

        let api_http = reqwest::Client::builder().timeout(config.request_timeout()).build()?;
        // The stream body is unbounded; only the connect phase is timed.
        let stream_http =
            reqwest::Client::builder().connect_timeout(config.request_timeout()).build()?;

        let store = Arc::new(CredentialStore::new());
        let (event_tx, _) = broadcast::channel(64);
        let (push_tx, _) = broadcast::channel(256);

        let guard =
            Arc::new(LogoutGuard::new(Arc::clone(&store), event_tx.clone(), config.sign_in_url()));
        let identity = IdentityClient::new(api_http.clone(), &config);
        let orchestrator = Arc::new(RefreshOrchestrator::new(
            Arc::clone(&store),
            identity,
            Arc::clone(&guard),
            event_tx.clone(),
            &config,
        ));
        let client = AuthenticatedClient::new(
            api_http,
            config.api_url.clone(),
            Arc::clone(&orchestrator),
            Arc::clone(&guard),
        );
        let stream = EventStreamClient::new(
            stream_http,
            Arc::clone(&store),
            &config,
            Arc::new(push_tx.clone()),
        );

        Ok(Arc::new(Self { config, store, guard, orchestrator, client, stream, event_tx, push_tx }))
    }

    /// Authenticate and start a fresh session lifecycle.
    pub async fn login(&self, identifier: &str, secret: &str) -> Result<(), SessionError> {
        let token = self.orchestrator.identity().authenticate(identifier, secret).await?;
        let credential = Credential::from_response(
            token,
            None,
            self.orchestrator.fallback_lifetime(),
            epoch_ms(),
        )
        .ok_or_else(|| SessionError::Server {
            status: 200,
            body: "login response missing access or refresh token".to_owned(),
        })?;

        self.store.replace(credential);
        self.guard.reset();
        tracing::info!(identifier, "signed in");
        let _ = self.event_tx.send(SessionEvent::SignedIn);
        Ok(())
    }

    /// User-initiated sign-out. Returns `false` if the session had already
    /// been signed out.
    pub fn logout(&self) -> bool {
        self.guard.trigger_logout_once("signed out by user")
    }

    /// Renew now regardless of expiry. A refused renewal signs the session
    /// out, as on every other path.
    pub async fn refresh_now(&self) -> Result<Arc<Credential>, SessionError> {
        self.orchestrator.renew(RenewalTrigger::Manual).await.into_result()
    }

    pub fn is_signed_in(&self) -> bool {
        !self.store.is_empty() && !self.guard.is_latched()
    }

    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        self.client.execute(request).await
    }

    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<RefreshOrchestrator> {
        &self.orchestrator
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open the notification stream. Dropping or unsubscribing the handle
    /// tears it down.
    pub fn subscribe_notifications(&self) -> StreamSubscription {
        self.stream.subscribe()
    }

    /// Lifecycle events (sign-in, renewals, sign-out).
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Push events that invalidate cached notifications.
    pub fn subscribe_push(&self) -> broadcast::Receiver<PushEvent> {
        self.push_tx.subscribe()
    }

    /// Run the proactive refresh check every `refresh_check_ms` until `cancel`.
    pub fn spawn_refresh_ticker(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        spawn_refresh_ticker(
            Arc::clone(&self.orchestrator),
            self.config.refresh_check_interval(),
            cancel,
        )
    }
}
