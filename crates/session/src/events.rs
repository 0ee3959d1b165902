// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session lifecycle events, broadcast to anyone holding a receiver.

use serde::{Deserialize, Serialize};

/// Which path asked for a renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalTrigger {
    /// The credential was about to expire.
    Proactive,
    /// The server already rejected the credential.
    Reactive,
    /// Requested explicitly through `Session::refresh_now`.
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A fresh login established a new session lifecycle.
    SignedIn,
    /// The credential was renewed through the identity provider.
    Renewed { trigger: RenewalTrigger },
    /// The identity provider could not produce a new credential.
    RenewalFailed { trigger: RenewalTrigger, error: String },
    /// The session ended. Emitted at most once per lifecycle; `redirect_to`
    /// is the authentication entry point.
    SignedOut { reason: String, redirect_to: String },
}
