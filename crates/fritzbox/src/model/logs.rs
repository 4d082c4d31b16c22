// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;

use super::field_array;
use crate::errors::DecodeError;

const DATE_FORMAT: &str = "%d.%m.%y";
const TIME_FORMAT: &str = "%H:%M:%S";

/// One entry of the device's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub info_code: String,
    pub filter: String,
    /// Help link with the session parameter removed.
    pub help_url: String,
}

/// The `log` page, newest line first.
#[derive(Debug, Default)]
pub struct Logs {
    pub lines: Vec<LogLine>,
    pub rejected: Vec<DecodeError>,
}

impl Logs {
    /// Decodes the log page, reading timestamps in the host's local time zone.
    pub fn decode(body: &str) -> Result<Self, DecodeError> {
        Self::decode_in(body, &Local)
    }

    /// Decodes the log page, reading timestamps in `tz`.
    pub fn decode_in<Tz: TimeZone>(body: &str, tz: &Tz) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(body)?;
        let entries = field_array(&value, "data.log")?;

        let mut logs = Logs::default();
        for (index, entry) in entries.iter().enumerate() {
            match LogLine::from_fields(entry, index, tz) {
                Ok(line) => logs.lines.push(line),
                Err(e) => logs.rejected.push(e),
            }
        }
        Ok(logs)
    }
}

impl LogLine {
    fn from_fields<Tz: TimeZone>(entry: &Value, index: usize, tz: &Tz) -> Result<Self, DecodeError> {
        let date = column(entry, index, 0)?;
        let time = column(entry, index, 1)?;
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT)
            .map_err(|_| DecodeError::invalid(&column_path(index, 0), date))?;
        let time = NaiveTime::parse_from_str(time, TIME_FORMAT)
            .map_err(|_| DecodeError::invalid(&column_path(index, 1), time))?;
        let local = NaiveDateTime::new(date, time);
        let timestamp = tz
            .from_local_datetime(&local)
            .earliest()
            .ok_or_else(|| DecodeError::invalid(&column_path(index, 1), local))?
            .with_timezone(&Utc);

        Ok(LogLine {
            timestamp,
            message: column(entry, index, 2)?.to_string(),
            info_code: column(entry, index, 3)?.to_string(),
            filter: column(entry, index, 4)?.to_string(),
            help_url: sanitize_help_url(column(entry, index, 5).unwrap_or_default()),
        })
    }
}

fn column_path(index: usize, column: usize) -> String {
    format!("data.log.{index}.{column}")
}

fn column(entry: &Value, index: usize, column: usize) -> Result<&str, DecodeError> {
    match entry.get(column) {
        Some(Value::String(s)) => Ok(s.as_str()),
        Some(other) => Err(DecodeError::invalid(&column_path(index, column), other)),
        None => Err(DecodeError::missing(&column_path(index, column))),
    }
}

/// Removes the `sid` parameter from a help link so session IDs never leave the process.
///
/// Links are usually relative (`/help/help.lua?sid=...&helppage=...`); relative links stay
/// relative.
pub fn sanitize_help_url(raw: &str) -> String {
    const BASE: &str = "http://device.invalid/";

    let Ok(base) = Url::parse(BASE) else {
        return String::new();
    };
    let Ok(mut url) = base.join(raw) else {
        return String::new();
    };
    if url.query().is_none() {
        return raw.to_string();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "sid")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }

    let absolute = url.as_str();
    if Url::parse(raw).is_ok() {
        absolute.to_string()
    } else if raw.starts_with('/') {
        absolute.trim_start_matches(BASE.trim_end_matches('/')).to_string()
    } else {
        absolute.trim_start_matches(BASE).to_string()
    }
}
