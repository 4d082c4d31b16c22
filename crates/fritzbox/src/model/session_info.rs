// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;

use crate::errors::DecodeError;
use crate::session::SessionId;

/// The `SessionInfo` document returned by `login_sid.lua`.
///
/// ```xml
/// <?xml version="1.0" encoding="utf-8"?>
/// <SessionInfo><SID>0000000000000000</SID><Challenge>1234567z</Challenge><BlockTime>0</BlockTime><Rights></Rights></SessionInfo>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub sid: SessionId,
    pub challenge: String,
    /// Seconds the device wants the client to wait before the next login attempt.
    pub block_time: u64,
}

#[derive(Deserialize)]
#[serde(rename = "SessionInfo")]
struct RawSessionInfo {
    #[serde(rename = "SID")]
    sid: Option<String>,
    #[serde(rename = "Challenge")]
    challenge: Option<String>,
    #[serde(rename = "BlockTime")]
    block_time: Option<String>,
}

impl SessionInfo {
    pub fn from_xml(body: &str) -> Result<Self, DecodeError> {
        let raw: RawSessionInfo = quick_xml::de::from_str(body)?;

        let sid = SessionId::new(
            raw.sid
                .ok_or_else(|| DecodeError::missing("SessionInfo.SID"))?
                .trim(),
        );
        let challenge = raw
            .challenge
            .map(|challenge| challenge.trim().to_string())
            .ok_or_else(|| DecodeError::missing("SessionInfo.Challenge"))?;
        // Without a session the challenge is the only way in.
        if sid.is_sentinel() && challenge.is_empty() {
            return Err(DecodeError::missing("SessionInfo.Challenge"));
        }
        let block_time = match raw.block_time.as_deref().map(str::trim) {
            None | Some("") => 0,
            Some(value) => value
                .parse::<u64>()
                .map_err(|_| DecodeError::invalid("SessionInfo.BlockTime", value))?,
        };

        Ok(SessionInfo {
            sid,
            challenge,
            block_time,
        })
    }
}
