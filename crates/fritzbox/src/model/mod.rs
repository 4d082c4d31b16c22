// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decoders for the payloads the web interface returns.
//!
//! The interface is loosely typed: numbers arrive as strings more often than not, and entire
//! subtrees disappear depending on the device type or firmware. Every field is therefore read
//! through the helpers below, which either produce a typed value or a [`DecodeError`] that
//! names the dotted path of the field that was missing or malformed.

pub mod device;
pub mod lan_devices;
pub mod logs;
pub mod session_info;

pub use device::{DeviceDetails, DeviceKind, LanDetails, WlanDetails};
pub use lan_devices::{LanDevice, LanDevices};
pub use logs::{LogLine, Logs};
pub use session_info::SessionInfo;

use crate::errors::DecodeError;
use serde_json::Value;

fn pointer(path: &str) -> String {
    if path.is_empty() {
        return String::new();
    }
    format!("/{}", path.replace('.', "/"))
}

/// Looks up a dotted path (`data.vars.dev.devType`, array indices allowed) below `value`.
pub(crate) fn lookup<'a>(value: &'a Value, path: &str) -> Result<&'a Value, DecodeError> {
    value
        .pointer(&pointer(path))
        .filter(|v| !v.is_null())
        .ok_or_else(|| DecodeError::missing(path))
}

pub(crate) fn field_str(value: &Value, path: &str) -> Result<String, DecodeError> {
    match lookup(value, path)? {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(DecodeError::invalid(path, other)),
    }
}

/// Like [`field_str`], but an absent field reads as an empty string.
pub(crate) fn field_str_or_empty(value: &Value, path: &str) -> Result<String, DecodeError> {
    match field_str(value, path) {
        Err(DecodeError::MissingField { .. }) => Ok(String::new()),
        other => other,
    }
}

/// Reads a numeric field that may be encoded as a JSON number or as a string.
pub(crate) fn field_f64(value: &Value, path: &str) -> Result<f64, DecodeError> {
    match lookup(value, path)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| DecodeError::invalid(path, n)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| DecodeError::invalid(path, s)),
        other => Err(DecodeError::invalid(path, other)),
    }
}

/// Numeric field where the device uses an empty string (or leaves the field out) for "no value".
pub(crate) fn optional_f64(value: &Value, path: &str) -> Result<Option<f64>, DecodeError> {
    match lookup(value, path) {
        Err(DecodeError::MissingField { .. }) => Ok(None),
        Err(e) => Err(e),
        Ok(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Ok(_) => field_f64(value, path).map(Some),
    }
}

pub(crate) fn field_array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, DecodeError> {
    match lookup(value, path)? {
        Value::Array(items) => Ok(items),
        other => Err(DecodeError::invalid(path, other)),
    }
}
