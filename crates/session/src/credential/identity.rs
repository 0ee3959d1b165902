// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the identity provider's two token endpoints.

use serde::Serialize;

use crate::config::SessionConfig;
use crate::credential::{Credential, TokenResponse};
use crate::error::SessionError;

#[derive(Serialize)]
struct LoginRequest<'a> {
    identifier: &'a str,
    secret: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    access_token: &'a str,
}

pub struct IdentityClient {
    http: reqwest::Client,
    login_url: String,
    refresh_url: String,
}

impl IdentityClient {
    pub fn new(http: reqwest::Client, config: &SessionConfig) -> Self {
        Self {
            http,
            login_url: config.url(&config.login_path),
            refresh_url: config.url(&config.refresh_path),
        }
    }

    /// Exchange an identifier and secret for a token pair.
    pub async fn authenticate(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<TokenResponse, SessionError> {
        let resp = self
            .http
            .post(&self.login_url)
            .json(&LoginRequest { identifier, secret })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SessionError::AuthRejected { status: status.as_u16() });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| SessionError::Server {
            status: status.as_u16(),
            body: format!("malformed token response: {e}"),
        })
    }

    /// Exchange the refresh token for a new pair.
    ///
    /// The refresh token travels as the bearer credential; the (possibly
    /// expired) access token goes in the body.
    pub async fn refresh(&self, credential: &Credential) -> anyhow::Result<TokenResponse> {
        let resp = self
            .http
            .post(&self.refresh_url)
            .bearer_auth(&credential.refresh_token)
            .json(&RefreshRequest { access_token: &credential.access_token })
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("refresh failed ({status}): {text}");
        }

        let bytes = resp.bytes().await?;
        let token: TokenResponse = serde_json::from_slice(&bytes)
            .map_err(|e| anyhow::anyhow!("malformed refresh response: {e}"))?;
        Ok(token)
    }
}
