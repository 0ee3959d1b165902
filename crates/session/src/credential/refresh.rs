// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token refresh orchestration.
//!
//! Two triggers converge on [`RefreshOrchestrator::renew`]:
//!
//! - the proactive path ([`RefreshOrchestrator::fresh_credential`]) renews a
//!   credential that expires within the refresh buffer before handing it out;
//! - the reactive path ([`RefreshOrchestrator::recover_after_rejection`]) runs
//!   after the server rejected a credential. It first waits and re-reads the
//!   store twice in case a concurrent caller is already renewing, and only
//!   renews itself if the credential is still the rejected one.
//!
//! The reactive wait-and-re-peek is a best-effort de-duplication. Two callers
//! can still renew in parallel; the store only accepts a result computed from
//! the snapshot it still holds.
//!
//! A renewal the identity provider refuses ends the session through the
//! [`LogoutGuard`], whichever path asked for it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::credential::identity::IdentityClient;
use crate::credential::store::CredentialStore;
use crate::credential::{epoch_ms, Credential, RefreshOutcome};
use crate::events::{RenewalTrigger, SessionEvent};
use crate::logout::LogoutGuard;

pub struct RefreshOrchestrator {
    store: Arc<CredentialStore>,
    identity: IdentityClient,
    guard: Arc<LogoutGuard>,
    event_tx: broadcast::Sender<SessionEvent>,
    refresh_buffer: Duration,
    fallback_lifetime: Duration,
    reactive_delays: (Duration, Duration),
}

impl RefreshOrchestrator {
    pub fn new(
        store: Arc<CredentialStore>,
        identity: IdentityClient,
        guard: Arc<LogoutGuard>,
        event_tx: broadcast::Sender<SessionEvent>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            store,
            identity,
            guard,
            event_tx,
            refresh_buffer: config.refresh_buffer(),
            fallback_lifetime: config.access_token_lifetime,
            reactive_delays: config.reactive_delays(),
        }
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn identity(&self) -> &IdentityClient {
        &self.identity
    }

    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    pub fn fallback_lifetime(&self) -> Duration {
        self.fallback_lifetime
    }

    /// Whether `credential` is inside the proactive refresh window at `now_ms`.
    pub fn needs_renewal(&self, credential: &Credential, now_ms: u64) -> bool {
        credential.expires_within(self.refresh_buffer, now_ms)
    }

    /// Read the credential for use, renewing first if it is about to expire.
    ///
    /// `None` when signed out, including when the proactive renewal failed
    /// and signed the session out.
    pub async fn fresh_credential(&self) -> Option<Arc<Credential>> {
        let current = self.store.read()?;
        let now = epoch_ms();
        if !self.needs_renewal(&current, now) {
            return Some(current);
        }

        tracing::debug!(
            expires_in_ms = current.time_until_expiry(now).as_millis() as u64,
            "access token inside refresh buffer, renewing"
        );
        match self.renew(RenewalTrigger::Proactive).await {
            RefreshOutcome::Renewed(credential) => Some(credential),
            RefreshOutcome::Failed(_) => None,
        }
    }

    /// Recover after the server rejected `failed` with 401/498.
    pub async fn recover_after_rejection(&self, failed: &Credential) -> RefreshOutcome {
        let (first, second) = self.reactive_delays;
        for delay in [first, second] {
            tokio::time::sleep(delay).await;
            match self.store.read() {
                None => {
                    return RefreshOutcome::Failed("signed out while awaiting renewal".to_owned())
                }
                Some(current) if current.access_token != failed.access_token => {
                    tracing::debug!("credential renewed by a concurrent caller");
                    return RefreshOutcome::Renewed(current);
                }
                Some(_) => {}
            }
        }
        self.renew(RenewalTrigger::Reactive).await
    }

    /// Exchange the stored refresh token for a new credential.
    ///
    /// The result is written only if the store still holds the snapshot the
    /// renewal started from. If the provider refuses, that session is signed
    /// out through the guard. Never returns an error; every failure is folded
    /// into [`RefreshOutcome::Failed`].
    pub async fn renew(&self, trigger: RenewalTrigger) -> RefreshOutcome {
        let Some(current) = self.store.read() else {
            return RefreshOutcome::Failed("no credential to renew".to_owned());
        };

        let result = match self.identity.refresh(&current).await {
            Ok(token) => Credential::from_response(
                token,
                Some(&current.refresh_token),
                self.fallback_lifetime,
                epoch_ms(),
            )
            .ok_or_else(|| anyhow::anyhow!("refresh response carried no usable tokens")),
            Err(e) => Err(e),
        };

        match result {
            Ok(next) => match self.store.replace_if(&current, next) {
                Some(credential) => {
                    tracing::info!(?trigger, "credentials refreshed");
                    let _ = self.event_tx.send(SessionEvent::Renewed { trigger });
                    RefreshOutcome::Renewed(credential)
                }
                None => self.superseded(trigger),
            },
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(?trigger, err = %error, "credential refresh failed");
                let _ = self
                    .event_tx
                    .send(SessionEvent::RenewalFailed { trigger, error: error.clone() });

                // Only the session this renewal belonged to is ended.
                if !self.store.clear_if(&current) {
                    return self.superseded(trigger);
                }
                self.guard.trigger_logout_once(&format!("renewal failed: {error}"));
                RefreshOutcome::Failed(error)
            }
        }
    }

    /// The store moved on while a renewal was on the wire: a sign-out, a new
    /// login or another renewal. Hand back whatever it holds now.
    fn superseded(&self, trigger: RenewalTrigger) -> RefreshOutcome {
        match self.store.read() {
            Some(newer) => {
                tracing::debug!(?trigger, "credential replaced during renewal, keeping newer");
                RefreshOutcome::Renewed(newer)
            }
            None => RefreshOutcome::Failed("signed out during renewal".to_owned()),
        }
    }
}

/// Spawn a background task that runs the proactive check on an interval.
///
/// Keeps an idle session's credential fresh between requests.
pub fn spawn_refresh_ticker(
    orchestrator: Arc<RefreshOrchestrator>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = timer.tick() => {}
            }

            if orchestrator.store().is_empty() {
                continue;
            }
            let _ = orchestrator.fresh_credential().await;
        }
    })
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;
