//! Self-registration with a registry via an HTTP-01-style challenge.
//!
//! The registry hands out a token and a string that must be served at a
//! path on the manifest's origin; verification is polled until the
//! registry confirms it. Polling is unbounded unless `max_attempts` is set.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::error::{MrpError, TransportError};
use crate::http;

pub const DEFAULT_POLL_SECONDS: f64 = 5.0;
const MIN_POLL_SECONDS: f64 = 1.0;
const MAX_POLL_SECONDS: f64 = 60.0;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid manifest_url {url:?}: {reason}")]
    InvalidManifestUrl { url: String, reason: String },
    #[error("submit failed ({status}): {body}")]
    SubmitFailed { status: u16, body: String },
    #[error("registry returned a malformed challenge: {0}")]
    MalformedChallenge(Value),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("not verified after {attempts} attempts; last error: {last_error}")]
    AttemptsExhausted { attempts: u32, last_error: String },
}

impl From<PublishError> for MrpError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Transport(e) => MrpError::Transport(e),
            PublishError::InvalidManifestUrl { .. } => MrpError::Validation(err.to_string()),
            other => MrpError::Execution(other.to_string()),
        }
    }
}

/// Domain-control challenge issued on submit.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Challenge {
    pub token: String,
    /// Exact body to serve.
    pub expected: String,
    /// Path to serve it at, on the manifest's origin.
    pub path: String,
    /// Public URL the registry will fetch.
    pub url: String,
}

impl Challenge {
    fn from_submit_response(data: &Value) -> Option<Self> {
        let text = |v: Option<&Value>| {
            v.and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let challenge = data.get("challenge");
        Some(Self {
            token: text(data.get("token"))?,
            expected: text(challenge.and_then(|c| c.get("expected")))?,
            path: text(challenge.and_then(|c| c.get("path")))?,
            url: text(challenge.and_then(|c| c.get("url")))?,
        })
    }

    /// Operator instructions.
    pub fn instructions(&self, registry: &str, manifest_url: &str) -> String {
        format!(
            "=== MRP Registry HTTP-01 Challenge ===\n\
             Registry: {registry}\n\
             Manifest: {manifest_url}\n\n\
             Create a public file at:\n  {}\n\
             So that this URL returns EXACTLY this string:\n  {}\n\n\
             {}\n",
            self.path, self.url, self.expected
        )
    }
}

/// What the public challenge URL served when re-fetched after a failed poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeProbe {
    Matches,
    Mismatch { served: String },
    Unreachable { error: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishEvent<'a> {
    Challenge(&'a Challenge),
    Pending {
        attempt: u32,
        error: String,
        probe: ChallengeProbe,
    },
    Published(&'a Value),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishOptions {
    pub poll_interval: Duration,
    /// `None` polls until verified.
    pub max_attempts: Option<u32>,
}

impl PublishOptions {
    /// Poll interval clamped to `[1, 60]` seconds.
    pub fn new(poll_seconds: f64, max_attempts: Option<u32>) -> Self {
        let secs = if poll_seconds.is_finite() {
            poll_seconds.clamp(MIN_POLL_SECONDS, MAX_POLL_SECONDS)
        } else {
            DEFAULT_POLL_SECONDS
        };
        Self {
            poll_interval: Duration::from_secs_f64(secs),
            max_attempts: max_attempts.filter(|n| *n > 0),
        }
    }
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_SECONDS, None)
    }
}

/// Fail fast unless `manifest_url` is an absolute http(s) URL with a host.
pub fn validate_manifest_url(manifest_url: &str) -> Result<Url, PublishError> {
    let invalid = |reason: &str| PublishError::InvalidManifestUrl {
        url: manifest_url.to_string(),
        reason: reason.to_string(),
    };
    let url = Url::parse(manifest_url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return Err(invalid("manifest_url must be an http(s) URL"));
    }
    Ok(url)
}

pub struct Publisher {
    registry_base: String,
    http: Client,
    timeout: Duration,
}

impl Publisher {
    pub fn new(registry_base: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            registry_base: registry_base.trim_end_matches('/').to_string(),
            http: http::protocol_client()?,
            timeout,
        })
    }

    pub fn registry_base(&self) -> &str {
        &self.registry_base
    }

    /// Submit `manifest_url` and poll verification until the registry
    /// publishes the entry. Returns the published entry.
    pub async fn publish<F>(
        &self,
        manifest_url: &str,
        options: PublishOptions,
        mut on_event: F,
    ) -> Result<Value, PublishError>
    where
        F: FnMut(PublishEvent<'_>),
    {
        validate_manifest_url(manifest_url)?;

        let challenge = self.submit(manifest_url).await?;
        on_event(PublishEvent::Challenge(&challenge));

        let verify_url = format!("{}/mrp/registry/verify", self.registry_base);
        let body = json!({ "token": challenge.token });
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tracing::debug!(attempt, %verify_url, "verifying challenge");

            let error = match http::post_json(
                &self.http,
                &verify_url,
                &body,
                "application/json",
                self.timeout,
            )
            .await
            {
                Ok(reply) if reply.status == 200 => {
                    let entry = match reply.json() {
                        Ok(out) => out.get("entry").cloned().unwrap_or(out),
                        Err(e) => {
                            tracing::warn!(
                                error = %e,
                                "verify reply is not JSON; keeping raw body"
                            );
                            Value::String(reply.body)
                        }
                    };
                    on_event(PublishEvent::Published(&entry));
                    tracing::info!(%manifest_url, "published");
                    return Ok(entry);
                }
                Ok(reply) => registry_error(&reply.body),
                Err(e) => e.to_string(),
            };

            let probe = self.probe_challenge(&challenge).await;
            on_event(PublishEvent::Pending {
                attempt,
                error: error.clone(),
                probe,
            });

            if options.max_attempts.is_some_and(|max| attempt >= max) {
                return Err(PublishError::AttemptsExhausted {
                    attempts: attempt,
                    last_error: error,
                });
            }
            tokio::time::sleep(options.poll_interval).await;
        }
    }

    async fn submit(&self, manifest_url: &str) -> Result<Challenge, PublishError> {
        let submit_url = format!("{}/mrp/registry/submit", self.registry_base);
        tracing::info!(%submit_url, %manifest_url, "submitting manifest");

        let reply = http::post_json(
            &self.http,
            &submit_url,
            &json!({ "manifest_url": manifest_url }),
            "application/json",
            self.timeout,
        )
        .await?;
        if !reply.is_success() {
            return Err(PublishError::SubmitFailed {
                status: reply.status,
                body: reply.body,
            });
        }

        let data = reply.json()?;
        Challenge::from_submit_response(&data).ok_or(PublishError::MalformedChallenge(data))
    }

    /// Best-effort: never fails the poll loop.
    async fn probe_challenge(&self, challenge: &Challenge) -> ChallengeProbe {
        match http::get(&self.http, &challenge.url, &[], "text/plain", self.timeout).await {
            Ok(reply) if !reply.is_success() => ChallengeProbe::Unreachable {
                error: format!("HTTP {}", reply.status),
            },
            Ok(reply) if reply.body.trim_end_matches(['\r', '\n']) == challenge.expected => {
                ChallengeProbe::Matches
            }
            Ok(reply) => ChallengeProbe::Mismatch { served: reply.body },
            Err(e) => ChallengeProbe::Unreachable {
                error: e.to_string(),
            },
        }
    }
}

/// The registry's `error` or `message`, else the raw body.
fn registry_error(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
