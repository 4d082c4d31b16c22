// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::{StatusCode, Url};
use serde_json::{json, Value};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, warn};

const PUSH_PATH: &str = "loki/api/v1/push";
const STREAM_LABEL: (&str, &str) = ("app", "fritzbox");

/// How often, and how fast, a failed push is attempted again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Up to `n` attempts back to back.
    Immediate(u64),
    /// Up to `n` attempts, waiting `attempt * delay_ms` between them.
    LinearBackoff(u64, u64),
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::LinearBackoff(3, 100)
    }
}

impl RetryStrategy {
    fn attempts(&self) -> u64 {
        match self {
            RetryStrategy::Immediate(n) | RetryStrategy::LinearBackoff(n, _) => (*n).max(1),
        }
    }

    fn delay(&self, attempt: u64) -> Option<Duration> {
        match self {
            RetryStrategy::Immediate(_) => None,
            RetryStrategy::LinearBackoff(_, delay_ms) => {
                Some(Duration::from_millis(delay_ms.saturating_mul(attempt)))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("cannot build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("invalid Loki URL {url:?}: {reason}")]
    Url { url: String, reason: String },

    #[error("Loki rejected the push with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("push failed after {attempts} attempts: {message}")]
    Destination { attempts: u64, message: String },
}

/// Sends batches of already serialized log lines as one Loki stream.
#[derive(Debug, Clone)]
pub struct Pusher {
    client: reqwest::Client,
    url: Url,
    retry_strategy: RetryStrategy,
}

impl Pusher {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        retry_strategy: RetryStrategy,
    ) -> Result<Self, PushError> {
        let invalid = |reason: String| PushError::Url {
            url: base_url.to_string(),
            reason,
        };
        let mut base = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let url = base.join(PUSH_PATH).map_err(|e| invalid(e.to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PushError::Build)?;

        Ok(Pusher {
            client,
            url,
            retry_strategy,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Pushes `lines` as a single stream. An empty batch sends nothing.
    pub async fn push(&self, lines: &[String]) -> Result<(), PushError> {
        if lines.is_empty() {
            return Ok(());
        }
        let body = push_body(lines, now_nanos());
        debug!("Pushing {} log lines to Loki", lines.len());
        self.send_with_retry(&body).await
    }

    async fn send_with_retry(&self, body: &Value) -> Result<(), PushError> {
        let max_attempts = self.retry_strategy.attempts();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let message = match self.client.post(self.url.clone()).json(body).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        debug!("Loki accepted push ({status})");
                        return Ok(());
                    }
                    let text = resp.text().await.unwrap_or_default();
                    if status.is_client_error() {
                        // Malformed or out-of-order payloads do not get better by resending.
                        error!("Loki rejected push with {status}: {text}");
                        return Err(PushError::Rejected { status, body: text });
                    }
                    format!("{status}: {text}")
                }
                Err(e) => e.to_string(),
            };

            if attempts >= max_attempts {
                error!("Failed to push logs after {attempts} attempts: {message}");
                return Err(PushError::Destination { attempts, message });
            }
            warn!("Loki push attempt {attempts} failed: {message}");
            if let Some(delay) = self.retry_strategy.delay(attempts) {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

/// Builds the push payload; every line of a batch is stamped with the same push time.
pub fn push_body(lines: &[String], timestamp_ns: u128) -> Value {
    let timestamp = timestamp_ns.to_string();
    let values: Vec<Value> = lines
        .iter()
        .map(|line| json!([timestamp, line]))
        .collect();
    json!({
        "streams": [{
            "stream": { STREAM_LABEL.0: STREAM_LABEL.1 },
            "values": values,
        }]
    })
}
