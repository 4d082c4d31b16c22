// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use fritzbox::model::LogLine;

/// Timestamp of the newest log line already forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogWatermark {
    last_forwarded: DateTime<Utc>,
}

impl Default for LogWatermark {
    fn default() -> Self {
        LogWatermark {
            last_forwarded: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

impl LogWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_forwarded(&self) -> DateTime<Utc> {
        self.last_forwarded
    }

    /// Lines strictly newer than the watermark, oldest first.
    ///
    /// `lines` is newest first, as the device returns it.
    pub fn filter_new(&self, lines: &[LogLine]) -> Vec<LogLine> {
        let mut unseen: Vec<LogLine> = lines
            .iter()
            .take_while(|line| line.timestamp > self.last_forwarded)
            .cloned()
            .collect();
        unseen.reverse();
        unseen
    }

    /// Moves the watermark to the newest fetched line. Never moves it backwards.
    pub fn advance(&mut self, lines: &[LogLine]) {
        if let Some(newest) = lines.first() {
            self.last_forwarded = self.last_forwarded.max(newest.timestamp);
        }
    }
}
