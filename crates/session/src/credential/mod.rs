// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential lifecycle: the store, the identity provider client, and the
//! refresh orchestrator that keeps the access token valid.

pub mod identity;
pub mod refresh;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;

/// An access/refresh token pair and the access token's absolute expiry.
///
/// Never mutated in place; the store swaps whole values.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    /// Epoch milliseconds.
    pub access_expires_at: u64,
}

impl Credential {
    /// Build a credential from an identity provider response.
    ///
    /// `fallback_lifetime` is used when the provider gives no lifetime hint.
    /// A missing refresh token keeps `previous_refresh`.
    pub fn from_response(
        token: TokenResponse,
        previous_refresh: Option<&str>,
        fallback_lifetime: Duration,
        now_ms: u64,
    ) -> Option<Self> {
        let refresh_token = match token.refresh_token {
            Some(rt) if !rt.is_empty() => rt,
            _ => previous_refresh?.to_owned(),
        };
        if token.access_token.is_empty() {
            return None;
        }
        let lifetime = token
            .lifetime_hint
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(fallback_lifetime);
        let lifetime_ms = u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX);
        Some(Self {
            access_token: token.access_token,
            refresh_token,
            access_expires_at: now_ms.saturating_add(lifetime_ms),
        })
    }

    /// Milliseconds left before the access token expires (zero once expired).
    pub fn time_until_expiry(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.access_expires_at.saturating_sub(now_ms))
    }

    /// Whether the access token expires within `buffer` of `now_ms`.
    pub fn expires_within(&self, buffer: Duration, now_ms: u64) -> bool {
        self.time_until_expiry(now_ms) < buffer
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("access_expires_at", &self.access_expires_at)
            .finish()
    }
}

fn redact(token: &str) -> String {
    let tail: String = token.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
    format!("…{tail}")
}

/// Token pair returned by both identity provider endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(alias = "access_token")]
    pub access_token: String,
    #[serde(default, alias = "refresh_token", skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    #[serde(
        default,
        rename = "accessTokenLifetimeHint",
        alias = "expires_in",
        alias = "expiresIn",
        skip_serializing_if = "Option::is_none"
    )]
    pub lifetime_hint: Option<u64>,
}

/// Result of a renewal attempt. Never an `Err`: callers always get a tag.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Renewed(Arc<Credential>),
    Failed(String),
}

impl RefreshOutcome {
    pub fn credential(&self) -> Option<&Arc<Credential>> {
        match self {
            Self::Renewed(cred) => Some(cred),
            Self::Failed(_) => None,
        }
    }

    pub fn into_result(self) -> Result<Arc<Credential>, SessionError> {
        match self {
            Self::Renewed(cred) => Ok(cred),
            Self::Failed(reason) => Err(SessionError::RenewalFailed(reason)),
        }
    }
}

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
