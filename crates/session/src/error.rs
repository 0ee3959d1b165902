// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the session core.
///
/// `AuthRejected` never escapes [`crate::client::AuthenticatedClient::execute`];
/// it only reaches callers of [`crate::session::Session::login`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Network or connection failure. Retry policy belongs to the caller.
    Transport(String),
    /// Non-auth, non-2xx response, surfaced verbatim.
    Server { status: u16, body: String },
    /// The server rejected the credential (HTTP 401 or 498).
    AuthRejected { status: u16 },
    /// The refresh endpoint could not produce a new credential.
    RenewalFailed(String),
    /// Terminal: renewal was attempted and failed, or a retried request was
    /// rejected again. The session has been signed out.
    AuthExpired,
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::Server { .. } => "SERVER_ERROR",
            Self::AuthRejected { .. } => "AUTH_REJECTED",
            Self::RenewalFailed(_) => "RENEWAL_FAILED",
            Self::AuthExpired => "AUTH_EXPIRED",
        }
    }

    /// Whether the caller's own retry policy may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::Server { status, body } => write!(f, "{} ({status}): {body}", self.as_str()),
            Self::AuthRejected { status } => write!(f, "{} ({status})", self.as_str()),
            Self::RenewalFailed(msg) => write!(f, "{}: {msg}", self.as_str()),
            Self::AuthExpired => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// HTTP statuses that mean "your credential is no longer accepted".
pub fn is_auth_rejection(status: u16) -> bool {
    status == 401 || status == 498
}
