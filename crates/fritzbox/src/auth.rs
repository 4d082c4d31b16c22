// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Challenge-response login against `login_sid.lua`.
//!
//! 1. Fetch the session info without parameters. A non-zero SID means no login is required.
//! 2. Otherwise answer the challenge with
//!    `<challenge>-<md5(utf16le("<challenge>-<password>"))>` and fetch the session info again.
//! 3. A zero SID in the second answer means the credentials were rejected.
//!
//! Whatever the outcome, the device's `BlockTime` is waited out before returning; ignoring it
//! makes the device extend its lockout.

use md5::{Digest, Md5};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::client::Device;
use crate::errors::AuthError;
use crate::model::SessionInfo;
use crate::session::{Credentials, Session};

/// Query parameters answering a login challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeAnswer {
    pub user: String,
    pub response: String,
}

/// Computes `<challenge>-<hex md5>` over the UTF-16LE encoding of `<challenge>-<password>`.
///
/// The device hashes the UTF-16LE octets, not the UTF-8 text.
pub fn challenge_response(challenge: &str, password: &str) -> String {
    let text = format!("{challenge}-{password}");
    let octets: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    let digest = Md5::digest(&octets);
    format!("{challenge}-{}", hex::encode(digest))
}

/// Performs the login handshake. Holds no state between calls.
pub struct Authenticator {
    device: Arc<dyn Device>,
    credentials: Credentials,
}

impl Authenticator {
    pub fn new(device: Arc<dyn Device>, credentials: Credentials) -> Self {
        Authenticator {
            device,
            credentials,
        }
    }

    pub async fn authenticate(&self) -> Result<Session, AuthError> {
        let mut block_time = Duration::ZERO;
        let result = self.handshake(&mut block_time).await;
        if !block_time.is_zero() {
            debug!("Waiting {}s block time", block_time.as_secs());
            tokio::time::sleep(block_time).await;
        }
        result
    }

    async fn handshake(&self, block_time: &mut Duration) -> Result<Session, AuthError> {
        debug!("Requesting login challenge");
        let body = self.device.login(None).await?;
        let info = SessionInfo::from_xml(&body)?;
        *block_time = Duration::from_secs(info.block_time);

        if !info.sid.is_sentinel() {
            debug!("Device handed out a session without login");
            return Ok(Session::new(info.sid, info.block_time));
        }

        let answer = ChallengeAnswer {
            user: self.credentials.username.clone(),
            response: challenge_response(&info.challenge, &self.credentials.password),
        };
        let body = self.device.login(Some(&answer)).await?;
        let info = SessionInfo::from_xml(&body)?;
        *block_time = Duration::from_secs(info.block_time);

        if info.sid.is_sentinel() {
            warn!(
                "Login as {:?} rejected, device block time is {}s",
                self.credentials.username, info.block_time
            );
            return Err(AuthError::InvalidCredentials);
        }

        debug!("Login succeeded");
        Ok(Session::new(info.sid, info.block_time))
    }
}
