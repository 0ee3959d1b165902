// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request executor for the Stockroom REST API.
//!
//! Every call reads the credential through the proactive refresh path,
//! attaches it as a bearer token, and on a 401/498 runs the reactive path
//! once. A request is retried at most once; a second rejection, or a renewal
//! that cannot produce a new credential, signs the session out through the
//! [`LogoutGuard`] and fails with [`SessionError::AuthExpired`].

use std::sync::Arc;

use bytes::Bytes;
use reqwest::{Method, Url};
use serde::de::DeserializeOwned;

use crate::credential::refresh::RefreshOrchestrator;
use crate::credential::{Credential, RefreshOutcome};
use crate::error::{is_auth_rejection, SessionError};
use crate::logout::LogoutGuard;

/// Description of one outbound call, replayable for the single retry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Status and raw body of a successful call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, SessionError> {
        serde_json::from_slice(&self.body).map_err(|e| SessionError::Server {
            status: self.status,
            body: format!("malformed response body: {e}"),
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Per-call retry state.
struct PendingRequest<'a> {
    request: &'a ApiRequest,
    issued_with: Option<Arc<Credential>>,
    retried: bool,
}

pub struct AuthenticatedClient {
    http: reqwest::Client,
    base_url: String,
    orchestrator: Arc<RefreshOrchestrator>,
    guard: Arc<LogoutGuard>,
}

impl AuthenticatedClient {
    pub fn new(
        http: reqwest::Client,
        base_url: String,
        orchestrator: Arc<RefreshOrchestrator>,
        guard: Arc<LogoutGuard>,
    ) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_owned(), orchestrator, guard }
    }

    /// Execute `request` with the current credential.
    ///
    /// Callers never see a raw 401/498: it becomes either a transparent retry
    /// or [`SessionError::AuthExpired`].
    pub async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, SessionError> {
        let mut pending = PendingRequest { request, issued_with: None, retried: false };

        loop {
            let credential =
                self.orchestrator.fresh_credential().await.ok_or(SessionError::AuthExpired)?;
            pending.issued_with = Some(Arc::clone(&credential));

            let resp = self.send(pending.request, &credential.access_token).await?;
            let status = resp.status().as_u16();

            if !is_auth_rejection(status) {
                let body = resp.bytes().await?;
                if (200..300).contains(&status) {
                    return Ok(ApiResponse { status, body });
                }
                return Err(SessionError::Server {
                    status,
                    body: String::from_utf8_lossy(&body).into_owned(),
                });
            }

            tracing::debug!(
                status,
                path = %pending.request.path,
                retried = pending.retried,
                "credential rejected"
            );
            if pending.retried {
                return Err(self.expire("credential rejected after renewal"));
            }

            let Some(issued_with) = pending.issued_with.take() else {
                return Err(SessionError::AuthExpired);
            };
            match self.orchestrator.recover_after_rejection(&issued_with).await {
                RefreshOutcome::Renewed(next) if next.access_token != issued_with.access_token => {
                    pending.retried = true;
                }
                RefreshOutcome::Renewed(_) => {
                    return Err(self.expire("renewal returned the rejected credential"));
                }
                RefreshOutcome::Failed(reason) => {
                    return Err(self.expire(&reason));
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SessionError> {
        self.execute(&ApiRequest::get(path)).await?.json()
    }

    /// POST JSON and return the decoded response; an empty body decodes as `null`.
    pub async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, SessionError> {
        let resp = self.execute(&ApiRequest::post(path, body)).await?;
        if resp.body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        resp.json()
    }

    pub async fn put_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, SessionError> {
        let resp = self.execute(&ApiRequest::put(path, body)).await?;
        if resp.body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        resp.json()
    }

    pub async fn delete(&self, path: &str) -> Result<(), SessionError> {
        self.execute(&ApiRequest::delete(path)).await.map(|_| ())
    }

    async fn send(
        &self,
        request: &ApiRequest,
        access_token: &str,
    ) -> Result<reqwest::Response, SessionError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, request.path))
            .map_err(|e| SessionError::Transport(format!("invalid url {}: {e}", request.path)))?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }

        let mut req = self.http.request(request.method.clone(), url).bearer_auth(access_token);
        if let Some(ref body) = request.body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    /// Sign out (at most once process-wide) and produce the terminal error.
    fn expire(&self, reason: &str) -> SessionError {
        if !self.guard.trigger_logout_once(reason) {
            tracing::debug!(reason, "session already signed out");
        }
        SessionError::AuthExpired
    }
}
