// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Scrapes a FRITZ!Box on a fixed interval. Device state becomes Prometheus gauges; new
//! entries of the device's event log go to Loki and a local file.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod errors;
pub mod log_file;
pub mod metrics;
pub mod scraper;
pub mod server;
pub mod sink;
pub mod watermark;

pub use config::Config;
pub use metrics::{Labels, MetricsSink, PrometheusSink, Series};
pub use scraper::{CycleOutcome, Phase, Scraper};
pub use sink::LogSink;
pub use watermark::LogWatermark;
