// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide logout latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::credential::store::CredentialStore;
use crate::events::SessionEvent;

/// Ensures a single sign-out per session lifecycle, however many callers
/// discover at once that the credential cannot be renewed.
pub struct LogoutGuard {
    latched: AtomicBool,
    store: Arc<CredentialStore>,
    event_tx: broadcast::Sender<SessionEvent>,
    sign_in_url: String,
}

impl LogoutGuard {
    pub fn new(
        store: Arc<CredentialStore>,
        event_tx: broadcast::Sender<SessionEvent>,
        sign_in_url: String,
    ) -> Self {
        Self { latched: AtomicBool::new(false), store, event_tx, sign_in_url }
    }

    /// Flip the latch and sign out if this caller is first.
    ///
    /// Returns `true` only for the caller that performed the sign-out.
    pub fn trigger_logout_once(&self, reason: &str) -> bool {
        if self
            .latched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(reason, "logout already in progress");
            return false;
        }

        self.store.clear();
        tracing::warn!(reason, redirect = %self.sign_in_url, "session signed out");
        let _ = self.event_tx.send(SessionEvent::SignedOut {
            reason: reason.to_owned(),
            redirect_to: self.sign_in_url.clone(),
        });
        true
    }

    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }

    /// Start a new lifecycle. Only a successful login calls this.
    pub(crate) fn reset(&self) {
        self.latched.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "logout_tests.rs"]
mod tests;
