// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// A payload did not have the shape its decoder expects.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid XML payload: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("missing field `{field}`")]
    MissingField { field: String },

    #[error("field `{field}` has unexpected value {value:?}")]
    InvalidField { field: String, value: String },
}

impl DecodeError {
    pub(crate) fn missing(field: &str) -> Self {
        Self::MissingField {
            field: field.to_string(),
        }
    }

    pub(crate) fn invalid(field: &str, value: impl ToString) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Failure to get a usable response body out of the device.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request to {path} failed: {source}")]
    Transport {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} answered with status {status}")]
    Status {
        path: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("cannot build HTTP client: {0}")]
    Build(#[source] reqwest::Error),

    #[error("cannot build URL for {path}: {reason}")]
    Url { path: &'static str, reason: String },
}

impl ClientError {
    /// True when the device refused the request because of the session it carried.
    pub fn is_session_rejection(&self) -> bool {
        matches!(
            self,
            ClientError::Status { status, .. }
                if *status == reqwest::StatusCode::FORBIDDEN
                    || *status == reqwest::StatusCode::UNAUTHORIZED
        )
    }
}

/// Why a login handshake did not produce a session.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The device rejected the challenge response.
    #[error("device rejected the login credentials")]
    InvalidCredentials,

    #[error("device unreachable: {0}")]
    Unreachable(#[from] ClientError),

    #[error("malformed session info: {0}")]
    Malformed(#[from] DecodeError),
}
