// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use core::time::Duration;
use reqwest::{Response, Url};
use tracing::{debug, trace};

use crate::auth::ChallengeAnswer;
use crate::errors::ClientError;
use crate::model::lan_devices::LAN_DEVICE_QUERY;
use crate::session::SessionId;

/// Upper bound for a single request to the device.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const LOGIN_PATH: &str = "login_sid.lua";
const QUERY_PATH: &str = "query.lua";
const DATA_PATH: &str = "data.lua";

/// The requests the exporter issues against the device, returning raw response bodies.
///
/// Decoding is left to the caller so that a body which fails to decode can be told apart from
/// a request that never got an answer.
#[async_trait]
pub trait Device: Send + Sync {
    /// `login_sid.lua`, without parameters to fetch a challenge, or with the computed answer.
    async fn login(&self, answer: Option<&ChallengeAnswer>) -> Result<String, ClientError>;

    /// The network device list from `query.lua`.
    async fn lan_devices(&self, sid: &SessionId) -> Result<String, ClientError>;

    /// The `edit_device` page of one device from `data.lua`.
    async fn device_details(&self, sid: &SessionId, uid: &str) -> Result<String, ClientError>;

    /// The event log page from `data.lua`.
    async fn event_log(&self, sid: &SessionId) -> Result<String, ClientError>;
}

/// [`Device`] implementation over HTTP.
#[derive(Debug, Clone)]
pub struct FritzClient {
    base: Url,
    client: reqwest::Client,
}

impl FritzClient {
    pub fn new(mut base: Url, timeout: Duration) -> Result<Self, ClientError> {
        // Url::join drops the last path segment unless it ends with a slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(FritzClient { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn url(&self, path: &'static str) -> Result<Url, ClientError> {
        self.base.join(path).map_err(|e| ClientError::Url {
            path,
            reason: e.to_string(),
        })
    }

    async fn get(&self, path: &'static str, query: &[(&str, &str)]) -> Result<String, ClientError> {
        let url = self.url(path)?;
        debug!("GET {path}");
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|source| ClientError::Transport { path, source })?;
        read_body(path, response).await
    }

    async fn post(&self, path: &'static str, form: &[(&str, &str)]) -> Result<String, ClientError> {
        let url = self.url(path)?;
        debug!("POST {path}");
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|source| ClientError::Transport { path, source })?;
        read_body(path, response).await
    }
}

async fn read_body(path: &'static str, response: Response) -> Result<String, ClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Status { path, status });
    }
    let body = response
        .text()
        .await
        .map_err(|source| ClientError::Transport { path, source })?;
    trace!("{path} answered with {} bytes", body.len());
    Ok(body)
}

#[async_trait]
impl Device for FritzClient {
    async fn login(&self, answer: Option<&ChallengeAnswer>) -> Result<String, ClientError> {
        match answer {
            None => self.get(LOGIN_PATH, &[]).await,
            Some(answer) => {
                self.get(
                    LOGIN_PATH,
                    &[
                        ("user", answer.user.as_str()),
                        ("response", answer.response.as_str()),
                    ],
                )
                .await
            }
        }
    }

    async fn lan_devices(&self, sid: &SessionId) -> Result<String, ClientError> {
        self.get(QUERY_PATH, &[("sid", sid.as_str()), ("network", LAN_DEVICE_QUERY)])
            .await
    }

    async fn device_details(&self, sid: &SessionId, uid: &str) -> Result<String, ClientError> {
        self.post(
            DATA_PATH,
            &[
                ("xhr", "1"),
                ("xhrId", "all"),
                ("lang", "de"),
                ("dev", uid),
                ("page", "edit_device"),
                ("initialRefreshParamsSaved", "true"),
                ("no_siderenew", ""),
                ("sid", sid.as_str()),
            ],
        )
        .await
    }

    async fn event_log(&self, sid: &SessionId) -> Result<String, ClientError> {
        self.post(
            DATA_PATH,
            &[
                ("page", "log"),
                ("xhr", "1"),
                ("xhrId", "all"),
                ("lang", "de"),
                ("no_siderenew", ""),
                ("filter", "0"),
                ("sid", sid.as_str()),
            ],
        )
        .await
    }
}
