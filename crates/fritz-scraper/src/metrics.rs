// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Gauges published for the device and the sink that holds them.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use std::collections::HashMap;

use crate::errors::MetricsError;

const IDENTITY: &[&str] = &["name", "ip", "mac", "dev_type"];
const IDENTITY_DIRECTION: &[&str] = &["name", "ip", "mac", "dev_type", "direction"];
const IDENTITY_WLAN: &[&str] = &[
    "name",
    "ip",
    "mac",
    "dev_type",
    "band",
    "standard",
    "encryption",
];
const BUILD: &[&str] = &["version", "revision"];

/// Every gauge the exporter publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Series {
    LanDeviceOnline,
    LanDeviceActive,
    LanDeviceSpeed,
    LanDeviceEthernetSpeed,
    WlanDeviceSignal,
    WlanDeviceSpeed,
    WlanDeviceSpeedMax,
    WlanDeviceInfo,
    BuildInfo,
}

impl Series {
    pub const ALL: [Series; 9] = [
        Series::LanDeviceOnline,
        Series::LanDeviceActive,
        Series::LanDeviceSpeed,
        Series::LanDeviceEthernetSpeed,
        Series::WlanDeviceSignal,
        Series::WlanDeviceSpeed,
        Series::WlanDeviceSpeedMax,
        Series::WlanDeviceInfo,
        Series::BuildInfo,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Series::LanDeviceOnline => "fritzbox_lan_devices_online",
            Series::LanDeviceActive => "fritzbox_lan_devices_active",
            Series::LanDeviceSpeed => "fritzbox_lan_devices_speed",
            Series::LanDeviceEthernetSpeed => "fritzbox_lan_devices_ethernet_speed",
            Series::WlanDeviceSignal => "fritzbox_wlan_devices_signal",
            Series::WlanDeviceSpeed => "fritzbox_wlan_devices_speed",
            Series::WlanDeviceSpeedMax => "fritzbox_wlan_devices_speed_max",
            Series::WlanDeviceInfo => "fritzbox_wlan_devices_info",
            Series::BuildInfo => "fritz_exporter_build_info",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Series::LanDeviceOnline => "Gauge showing online state of device",
            Series::LanDeviceActive => "Gauge showing active state of device",
            Series::LanDeviceSpeed => "Gauge showing speed of device",
            Series::LanDeviceEthernetSpeed => "Gauge showing link speed of wired devices",
            Series::WlanDeviceSignal => "Gauge showing signal strength of wifi devices",
            Series::WlanDeviceSpeed => "Gauge showing current speed of wifi devices",
            Series::WlanDeviceSpeedMax => "Gauge showing maximum speed of wifi devices",
            Series::WlanDeviceInfo => "Gauge carrying band, standard and encryption of wifi devices",
            Series::BuildInfo => "Version of the exporter, always 1",
        }
    }

    pub fn label_names(self) -> &'static [&'static str] {
        match self {
            Series::LanDeviceOnline
            | Series::LanDeviceActive
            | Series::LanDeviceSpeed
            | Series::LanDeviceEthernetSpeed
            | Series::WlanDeviceSignal => IDENTITY,
            Series::WlanDeviceSpeed | Series::WlanDeviceSpeedMax => IDENTITY_DIRECTION,
            Series::WlanDeviceInfo => IDENTITY_WLAN,
            Series::BuildInfo => BUILD,
        }
    }
}

/// Label values in the order of [`Series::label_names`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Labels(Vec<String>);

impl Labels {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Labels(values.into_iter().map(Into::into).collect())
    }

    pub fn identity(name: &str, ip: &str, mac: &str, dev_type: &str) -> Self {
        Labels::new([name, ip, mac, dev_type])
    }

    /// Copy of these labels with `values` appended.
    pub fn with(&self, values: &[&str]) -> Self {
        let mut labels = self.clone();
        labels.0.extend(values.iter().map(|v| v.to_string()));
        labels
    }

    pub fn values(&self) -> Vec<&str> {
        self.0.iter().map(String::as_str).collect()
    }
}

/// Where scraped values end up.
pub trait MetricsSink: Send + Sync {
    fn set_gauge(&self, series: Series, labels: &Labels, value: f64) -> Result<(), MetricsError>;

    /// Removes one label combination of a series.
    fn delete_gauge(&self, series: Series, labels: &Labels) -> Result<(), MetricsError>;
}

/// [`MetricsSink`] backed by a private Prometheus registry.
pub struct PrometheusSink {
    registry: Registry,
    gauges: HashMap<Series, GaugeVec>,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let mut gauges = HashMap::with_capacity(Series::ALL.len());
        for series in Series::ALL {
            let gauge = GaugeVec::new(
                Opts::new(series.name(), series.help()),
                series.label_names(),
            )?;
            registry.register(Box::new(gauge.clone()))?;
            gauges.insert(series, gauge);
        }
        Ok(PrometheusSink { registry, gauges })
    }

    /// Text exposition of every registered series.
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    fn gauge(&self, series: Series) -> Result<&GaugeVec, MetricsError> {
        self.gauges.get(&series).ok_or_else(|| {
            MetricsError::Prometheus(prometheus::Error::Msg(format!(
                "{} is not registered",
                series.name()
            )))
        })
    }
}

impl MetricsSink for PrometheusSink {
    fn set_gauge(&self, series: Series, labels: &Labels, value: f64) -> Result<(), MetricsError> {
        self.gauge(series)?
            .get_metric_with_label_values(&labels.values())?
            .set(value);
        Ok(())
    }

    fn delete_gauge(&self, series: Series, labels: &Labels) -> Result<(), MetricsError> {
        self.gauge(series)?.remove_label_values(&labels.values())?;
        Ok(())
    }
}
