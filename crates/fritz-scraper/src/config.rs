// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::Url;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::errors::ConfigError;

pub const DEFAULT_METRICS_ADDRESS: &str = "0.0.0.0:9200";
const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Exporter configuration, read from `FRITZ_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the device, e.g. `http://fritz.box/`
    pub fritzbox_url: String,
    /// Login user; many devices accept an empty one
    pub username: String,
    pub password: String,
    /// trace, debug, info, warn or error
    pub log_level: String,
    /// Bind address of the `/metrics` endpoint
    pub metrics_address: String,
    pub log_path: Option<PathBuf>,
    /// Base URL of a Loki instance
    pub loki_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fritzbox_url: "http://fritz.box/".to_string(),
            username: String::new(),
            password: String::new(),
            log_level: "info".to_string(),
            metrics_address: DEFAULT_METRICS_ADDRESS.to_string(),
            log_path: None,
            loki_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let fritzbox_url = env::var("FRITZ_FRITZBOX_URL")
            .map_err(|_| ConfigError::Missing("FRITZ_FRITZBOX_URL"))?;
        let password =
            env::var("FRITZ_PASSWORD").map_err(|_| ConfigError::Missing("FRITZ_PASSWORD"))?;
        let username = env::var("FRITZ_USERNAME").unwrap_or_default();
        let log_level = env::var("FRITZ_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| "info".to_string());
        let metrics_address = env::var("FRITZ_EXPORTER_METRICS_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_METRICS_ADDRESS.to_string());
        let log_path = non_empty_var("FRITZ_LOG_PATH").map(PathBuf::from);
        let loki_url = non_empty_var("FRITZ_LOKI_URL");

        let config = Self {
            fritzbox_url,
            username,
            password,
            log_level,
            metrics_address,
            log_path,
            loki_url,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.device_url()?;
        self.metrics_addr()?;

        if self.password.is_empty() {
            return Err(ConfigError::Invalid(
                "FRITZ_PASSWORD cannot be empty".to_string(),
            ));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        if let Some(loki_url) = &self.loki_url {
            Url::parse(loki_url).map_err(|e| {
                ConfigError::Invalid(format!("Invalid FRITZ_LOKI_URL '{loki_url}': {e}"))
            })?;
        }

        Ok(())
    }

    pub fn device_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.fritzbox_url).map_err(|e| {
            ConfigError::Invalid(format!(
                "Invalid FRITZ_FRITZBOX_URL '{}': {e}",
                self.fritzbox_url
            ))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "FRITZ_FRITZBOX_URL must be http or https, got '{}'",
                url.scheme()
            )));
        }
        Ok(url)
    }

    pub fn metrics_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.metrics_address.parse().map_err(|e| {
            ConfigError::Invalid(format!(
                "Invalid FRITZ_EXPORTER_METRICS_ADDRESS '{}': {e}",
                self.metrics_address
            ))
        })
    }

    /// Lines are fetched only when they have somewhere to go.
    pub fn log_forwarding_enabled(&self) -> bool {
        self.log_path.is_some() || self.loki_url.is_some()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|val| !val.trim().is_empty())
}
