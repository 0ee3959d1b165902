// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Floor for the proactive refresh buffer.
pub const MIN_REFRESH_BUFFER: Duration = Duration::from_millis(2000);

const DEFAULT_API_URL: &str = "http://127.0.0.1:3000";
const DEFAULT_REACTIVE_FIRST_DELAY_MS: u64 = 1000;
const DEFAULT_REACTIVE_SECOND_DELAY_MS: u64 = 500;
const DEFAULT_RECONNECT_BASE_MS: u64 = 3000;
const DEFAULT_RECONNECT_CAP_MS: u64 = 30_000;
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_REFRESH_CHECK_MS: u64 = 60_000;
const DEFAULT_ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// Configuration for the session core.
///
/// Resolved once at startup from flags and `STOCKROOM_*` environment
/// variables, then checked with [`SessionConfig::validate`].
#[derive(Debug, Clone, clap::Args)]
pub struct SessionConfig {
    /// Base URL of the Stockroom API.
    #[arg(long, default_value = DEFAULT_API_URL, env = "STOCKROOM_API_URL")]
    pub api_url: String,

    /// Identity provider path that exchanges credentials for tokens.
    #[arg(long, default_value = "/auth/login", env = "STOCKROOM_LOGIN_PATH")]
    pub login_path: String,

    /// Identity provider path that exchanges a refresh token for new tokens.
    #[arg(long, default_value = "/auth/refresh", env = "STOCKROOM_REFRESH_PATH")]
    pub refresh_path: String,

    /// Server-sent notification stream path.
    #[arg(long, default_value = "/notifications/stream", env = "STOCKROOM_STREAM_PATH")]
    pub stream_path: String,

    /// Where a signed-out user is sent. Defaults to `{api_url}{login_path}`.
    #[arg(long, env = "STOCKROOM_SIGN_IN_URL")]
    pub sign_in_url: Option<String>,

    /// Configured access token lifetime (`15m`, `900s`, `1h`, `500ms`, bare seconds).
    #[arg(
        long,
        default_value = "15m",
        value_parser = parse_lifetime,
        env = "STOCKROOM_ACCESS_TOKEN_LIFETIME"
    )]
    pub access_token_lifetime: Duration,

    /// Wait before re-reading the store after a rejected credential.
    #[arg(long, default_value_t = DEFAULT_REACTIVE_FIRST_DELAY_MS, env = "STOCKROOM_REACTIVE_FIRST_DELAY_MS")]
    pub reactive_first_delay_ms: u64,

    /// Second, shorter wait before renewing on our own.
    #[arg(long, default_value_t = DEFAULT_REACTIVE_SECOND_DELAY_MS, env = "STOCKROOM_REACTIVE_SECOND_DELAY_MS")]
    pub reactive_second_delay_ms: u64,

    /// Base delay of the stream reconnect backoff.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_BASE_MS, env = "STOCKROOM_RECONNECT_BASE_MS")]
    pub reconnect_base_ms: u64,

    /// Upper bound of the stream reconnect backoff.
    #[arg(long, default_value_t = DEFAULT_RECONNECT_CAP_MS, env = "STOCKROOM_RECONNECT_CAP_MS")]
    pub reconnect_cap_ms: u64,

    /// Reconnect attempts without a successful open before the stream gives up.
    #[arg(long, default_value_t = DEFAULT_MAX_RECONNECT_ATTEMPTS, env = "STOCKROOM_MAX_RECONNECT_ATTEMPTS")]
    pub max_reconnect_attempts: u32,

    /// Stream event types that invalidate cached notifications.
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "notification",
        env = "STOCKROOM_STREAM_EVENTS"
    )]
    pub stream_events: Vec<String>,

    /// Timeout for identity provider and resource calls.
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_MS, env = "STOCKROOM_REQUEST_TIMEOUT_MS")]
    pub request_timeout_ms: u64,

    /// Interval of the periodic proactive refresh check.
    #[arg(long, default_value_t = DEFAULT_REFRESH_CHECK_MS, env = "STOCKROOM_REFRESH_CHECK_MS")]
    pub refresh_check_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            login_path: "/auth/login".to_owned(),
            refresh_path: "/auth/refresh".to_owned(),
            stream_path: "/notifications/stream".to_owned(),
            sign_in_url: None,
            access_token_lifetime: DEFAULT_ACCESS_TOKEN_LIFETIME,
            reactive_first_delay_ms: DEFAULT_REACTIVE_FIRST_DELAY_MS,
            reactive_second_delay_ms: DEFAULT_REACTIVE_SECOND_DELAY_MS,
            reconnect_base_ms: DEFAULT_RECONNECT_BASE_MS,
            reconnect_cap_ms: DEFAULT_RECONNECT_CAP_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            stream_events: vec!["notification".to_owned()],
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            refresh_check_ms: DEFAULT_REFRESH_CHECK_MS,
        }
    }
}

impl SessionConfig {
    /// Check option shapes and ranges. Called once before the session starts.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            anyhow::bail!("api_url must be an http(s) URL: {}", self.api_url);
        }
        for (name, path) in [
            ("login_path", &self.login_path),
            ("refresh_path", &self.refresh_path),
            ("stream_path", &self.stream_path),
        ] {
            if !path.starts_with('/') {
                anyhow::bail!("{name} must start with '/': {path}");
            }
        }
        if self.access_token_lifetime.is_zero() {
            anyhow::bail!("access_token_lifetime must be non-zero");
        }
        if self.reconnect_base_ms == 0 || self.reconnect_base_ms > self.reconnect_cap_ms {
            anyhow::bail!(
                "reconnect delays must satisfy 0 < base ({}) <= cap ({})",
                self.reconnect_base_ms,
                self.reconnect_cap_ms
            );
        }
        if self.max_reconnect_attempts == 0 {
            anyhow::bail!("max_reconnect_attempts must be at least 1");
        }
        if self.stream_events.iter().all(|e| e.trim().is_empty()) {
            anyhow::bail!("stream_events must name at least one event type");
        }
        Ok(())
    }

    /// Absolute URL for an API path.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    /// Authentication entry point a signed-out user is redirected to.
    pub fn sign_in_url(&self) -> String {
        self.sign_in_url.clone().unwrap_or_else(|| self.url(&self.login_path))
    }

    /// `max(2s, 10% of the configured access token lifetime)`.
    pub fn refresh_buffer(&self) -> Duration {
        (self.access_token_lifetime / 10).max(MIN_REFRESH_BUFFER)
    }

    pub fn reactive_delays(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.reactive_first_delay_ms),
            Duration::from_millis(self.reactive_second_delay_ms),
        )
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_cap(&self) -> Duration {
        Duration::from_millis(self.reconnect_cap_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn refresh_check_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_check_ms)
    }
}

/// Parse a token lifetime string such as `15m`, `900s`, `1h`, `2d` or `500ms`.
///
/// A bare number is read as seconds.
pub fn parse_lifetime(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return Err(format!("invalid lifetime {s:?}: expected a number"));
    }
    let value: u64 = digits.parse().map_err(|e| format!("invalid lifetime {s:?}: {e}"))?;
    let secs_per_unit = match unit.trim() {
        "ms" => return Ok(Duration::from_millis(value)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        other => return Err(format!("invalid lifetime {s:?}: unknown unit {other:?}")),
    };
    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("invalid lifetime {s:?}: out of range"))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
