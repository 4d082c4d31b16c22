// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde_json::Value;

use super::{field_f64, field_str, lookup};
use crate::errors::DecodeError;

const DEV: &str = "data.vars.dev";

/// Radio details of a wireless client.
#[derive(Debug, Clone, PartialEq)]
pub struct WlanDetails {
    pub rssi: f64,
    pub speed_tx: f64,
    pub speed_rx: f64,
    pub speed_tx_max: f64,
    pub speed_rx_max: f64,
    pub band: String,
    pub standard: String,
    pub encryption: String,
}

/// Port details of a wired client.
#[derive(Debug, Clone, PartialEq)]
pub struct LanDetails {
    pub port: String,
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceKind {
    Wlan(WlanDetails),
    Lan(LanDetails),
    Other(String),
}

/// The `edit_device` page of a single network device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceDetails {
    pub name: Option<String>,
    pub kind: DeviceKind,
}

impl DeviceDetails {
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(body)?;
        let dev = lookup(&value, DEV)?;

        let dev_type = field_str(dev, "devType").map_err(|e| prefixed(e, DEV))?;
        let name = field_str(dev, "name.displayName").ok();

        let kind = match dev_type.as_str() {
            "wlan" => DeviceKind::Wlan(decode_wlan(dev).map_err(|e| prefixed(e, DEV))?),
            "lan" => DeviceKind::Lan(decode_lan(dev).map_err(|e| prefixed(e, DEV))?),
            _ => DeviceKind::Other(dev_type),
        };

        Ok(DeviceDetails { name, kind })
    }

    /// The device type label used by the metrics (`wlan`, `lan`, or what the device reported).
    pub fn dev_type(&self) -> &str {
        match &self.kind {
            DeviceKind::Wlan(_) => "wlan",
            DeviceKind::Lan(_) => "lan",
            DeviceKind::Other(other) => other,
        }
    }
}

fn decode_wlan(dev: &Value) -> Result<WlanDetails, DecodeError> {
    let show = lookup(dev, "wlan.show.0")?;
    let radio = lookup(dev, "wlan.devs.0")?;
    let within = |e: DecodeError, path: &str| prefixed(e, path);

    Ok(WlanDetails {
        rssi: field_f64(show, "rssi").map_err(|e| within(e, "wlan.show.0"))?,
        speed_tx: field_f64(show, "speed").map_err(|e| within(e, "wlan.show.0"))?,
        speed_rx: field_f64(show, "speed_rx").map_err(|e| within(e, "wlan.show.0"))?,
        speed_tx_max: field_f64(show, "speed_tx_max").map_err(|e| within(e, "wlan.show.0"))?,
        speed_rx_max: field_f64(show, "speed_rx_max").map_err(|e| within(e, "wlan.show.0"))?,
        band: field_str(radio, "band").map_err(|e| within(e, "wlan.devs.0"))?,
        standard: field_str(radio, "wlanStandard").map_err(|e| within(e, "wlan.devs.0"))?,
        encryption: field_str(radio, "encryption").map_err(|e| within(e, "wlan.devs.0"))?,
    })
}

fn decode_lan(dev: &Value) -> Result<LanDetails, DecodeError> {
    // path[0] is the box itself, path[1] the port the client hangs off.
    let hop = lookup(dev, "topology.path.path.1.device")?;
    let within = |e: DecodeError| prefixed(e, "topology.path.path.1.device");

    Ok(LanDetails {
        port: field_str(hop, "ethernetport").map_err(within)?,
        speed: field_f64(hop, "speed").map_err(within)?,
    })
}

fn prefixed(error: DecodeError, prefix: &str) -> DecodeError {
    match error {
        DecodeError::MissingField { field } => DecodeError::MissingField {
            field: format!("{prefix}.{field}"),
        },
        DecodeError::InvalidField { field, value } => DecodeError::InvalidField {
            field: format!("{prefix}.{field}"),
            value,
        },
        other => other,
    }
}
