// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stockroom session core: credential lifecycle, authenticated requests and
//! the push-notification stream.

pub mod client;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod logout;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Once;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::ApiRequest;
use crate::config::SessionConfig;
use crate::events::SessionEvent;
use crate::session::Session;

static CRYPTO_INIT: Once = Once::new();

/// Make ring the process-wide rustls provider before any client is built.
/// Later calls are no-ops.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Sign-in credentials for the binary.
///
/// Passed separately from [`SessionConfig`] because these args live on the
/// binary's CLI struct rather than the library config.
pub struct Login {
    pub identifier: String,
    pub secret: String,
}

#[derive(Debug, Clone, clap::Subcommand)]
pub enum Command {
    /// Tail the notification stream, printing each push event as JSON.
    Watch,
    /// Run one authenticated GET and print the response body.
    Get {
        /// API path, e.g. `/api/items`.
        path: String,
    },
}

/// Sign in and run `command` until it completes, the session is signed out,
/// or ctrl-c.
pub async fn run(config: SessionConfig, login: Login, command: Command) -> anyhow::Result<()> {
    let session = Session::new(config)?;
    session
        .login(&login.identifier, &login.secret)
        .await
        .map_err(|e| anyhow::anyhow!("login failed: {e}"))?;

    let shutdown = CancellationToken::new();
    let ticker = session.spawn_refresh_ticker(shutdown.clone());

    let result = match command {
        Command::Get { path } => {
            let resp = session.execute(&ApiRequest::get(path)).await?;
            println!("{}", resp.text());
            Ok(())
        }
        Command::Watch => watch(&session).await,
    };

    shutdown.cancel();
    let _ = ticker.await;
    result
}

async fn watch(session: &Session) -> anyhow::Result<()> {
    let mut events = session.subscribe_events();
    let mut push = session.subscribe_push();
    let subscription = session.subscribe_notifications();
    tracing::info!(url = %session.config().url(&session.config().stream_path), "watching notifications");

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            event = push.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "push receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
            event = events.recv() => match event {
                Ok(SessionEvent::SignedOut { reason, redirect_to }) => {
                    break Err(anyhow::anyhow!("signed out ({reason}); sign in again at {redirect_to}"));
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break Ok(()),
            },
        }
    };

    subscription.unsubscribe().await;
    outcome
}
