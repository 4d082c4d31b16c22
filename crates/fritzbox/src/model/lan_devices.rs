// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use super::{field_array, field_f64, field_str, field_str_or_empty, optional_f64};
use crate::errors::DecodeError;

/// Query selecting the device list from `query.lua`.
pub const LAN_DEVICE_QUERY: &str = "landevice:settings/landevice/list(name,ip,mac,UID,dhcp,wlan,ethernet,active,wakeup,deleteable,source,online,speed,guest,url,devtype)";

/// One entry of the network device list.
#[derive(Debug, Clone, PartialEq)]
pub struct LanDevice {
    pub name: String,
    pub ip: String,
    pub mac: String,
    pub uid: String,
    pub active: bool,
    pub online: bool,
    /// Link speed in Mbit/s; the device leaves it empty when unknown.
    pub speed: Option<f64>,
}

/// The device list answer of `query.lua`.
///
/// A payload without the `network` list is an error: that is what the interface returns once
/// the session expired. Single malformed entries only end up in `rejected`.
#[derive(Debug, Default)]
pub struct LanDevices {
    pub devices: Vec<LanDevice>,
    pub rejected: Vec<DecodeError>,
}

impl LanDevices {
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(body)?;
        let entries = field_array(&value, "network")?;

        let mut list = LanDevices::default();
        for (index, entry) in entries.iter().enumerate() {
            match LanDevice::from_value(entry) {
                Ok(device) => list.devices.push(device),
                Err(e) => list.rejected.push(match e {
                    DecodeError::MissingField { field } => DecodeError::MissingField {
                        field: format!("network.{index}.{field}"),
                    },
                    DecodeError::InvalidField { field, value } => DecodeError::InvalidField {
                        field: format!("network.{index}.{field}"),
                        value,
                    },
                    other => other,
                }),
            }
        }
        Ok(list)
    }
}

impl LanDevice {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(LanDevice {
            name: field_str(value, "name")?,
            uid: field_str(value, "UID")?,
            ip: field_str_or_empty(value, "ip")?,
            mac: field_str_or_empty(value, "mac")?,
            active: flag(value, "active")?,
            online: flag(value, "online")?,
            speed: optional_f64(value, "speed")?,
        })
    }
}

fn flag(value: &Value, path: &str) -> Result<bool, DecodeError> {
    match optional_f64(value, path)? {
        None => Ok(false),
        Some(_) => Ok(field_f64(value, path)? != 0.0),
    }
}
