// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::time::Duration;

/// Opaque session ticket handed out by `login_sid.lua`.
///
/// The device reports "no session" with an all-zero ID, so a `SessionId` may be the sentinel.
/// `Debug` never prints the ticket itself.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionId(String);

impl SessionId {
    pub const SENTINEL: &'static str = "0000000000000000";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn sentinel() -> Self {
        Self(Self::SENTINEL.to_string())
    }

    /// True when the ID is missing or all zeros.
    pub fn is_sentinel(&self) -> bool {
        self.0.is_empty() || self.0.bytes().all(|b| b == b'0')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_sentinel() {
            write!(f, "SessionId(<none>)")
        } else {
            write!(f, "SessionId(<redacted>)")
        }
    }
}

/// An authenticated session together with the cooldown the device exported with it.
///
/// A session is assumed valid until a request made with it is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: SessionId,
    pub block_time: Duration,
}

impl Session {
    pub fn new(id: SessionId, block_time_secs: u64) -> Self {
        Self {
            id,
            block_time: Duration::from_secs(block_time_secs),
        }
    }
}

/// Login credentials. Some devices accept an empty username.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
