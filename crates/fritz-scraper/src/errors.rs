// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use fritzbox::{AuthError, ClientError, DecodeError};
use std::net::SocketAddr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("metrics registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics exposition is not valid UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

#[derive(Debug, thiserror::Error)]
pub enum LogSinkError {
    #[error("cannot encode log line: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Push(#[from] loki::PushError),
}

/// Failure of one authenticated fetch against the device.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("cannot decode response: {0}")]
    Decode(#[from] DecodeError),

    #[error("re-login failed: {0}")]
    Relogin(#[source] AuthError),
}

impl FetchError {
    /// The device does not say when a session expired. It answers with a login page or a
    /// rejection status instead of the requested payload.
    pub fn is_session_expiry(&self) -> bool {
        match self {
            FetchError::Decode(_) => true,
            FetchError::Client(e) => e.is_session_rejection(),
            FetchError::Relogin(_) => false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("cannot bind metrics endpoint to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("metrics endpoint stopped accepting connections: {0}")]
    Accept(#[source] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("initial authentication failed: {0}")]
    Startup(#[source] AuthError),
}
