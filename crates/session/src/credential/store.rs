// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-slot credential store.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use crate::credential::Credential;

/// Holds the current credential, if any.
///
/// Reads hand out an `Arc` snapshot; the lock is only held for the pointer
/// clone or swap and never across an await, so reads do not suspend and a
/// replace is visible to every read that starts after it returns.
pub struct CredentialStore {
    slot: RwLock<Option<Arc<Credential>>>,
    /// Bumped whenever a credential is written.
    generation: watch::Sender<u64>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self { slot: RwLock::new(None), generation: watch::channel(0).0 }
    }
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> Option<Arc<Credential>> {
        self.slot.read().clone()
    }

    /// Atomically replace the stored credential, returning the new snapshot.
    pub fn replace(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        *self.slot.write() = Some(Arc::clone(&credential));
        self.generation.send_modify(|g| *g += 1);
        credential
    }

    /// Store `next` only if the slot still holds `expected` (same snapshot,
    /// not merely equal tokens). Returns `None` when the slot moved on: it was
    /// cleared, or another login or renewal replaced it.
    pub fn replace_if(&self, expected: &Arc<Credential>, next: Credential) -> Option<Arc<Credential>> {
        let next = Arc::new(next);
        {
            let mut slot = self.slot.write();
            if !holds(&slot, expected) {
                return None;
            }
            *slot = Some(Arc::clone(&next));
        }
        self.generation.send_modify(|g| *g += 1);
        Some(next)
    }

    /// Clear the slot only if it still holds `expected`.
    pub fn clear_if(&self, expected: &Arc<Credential>) -> bool {
        let mut slot = self.slot.write();
        let matched = holds(&slot, expected);
        if matched {
            *slot = None;
        }
        matched
    }

    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.slot.read().is_none()
    }

    /// Receiver that changes every time a credential is written.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }
}

fn holds(slot: &Option<Arc<Credential>>, expected: &Arc<Credential>) -> bool {
    slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, expected))
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
