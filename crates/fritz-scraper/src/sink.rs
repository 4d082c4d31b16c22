// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use fritzbox::model::LogLine;

use crate::errors::LogSinkError;

/// Remote destination for forwarded log lines.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn push(&self, lines: &[LogLine]) -> Result<(), LogSinkError>;
}

/// One JSON object per line, the format shared by the log file and Loki.
pub fn encode_lines(lines: &[LogLine]) -> Result<Vec<String>, serde_json::Error> {
    lines.iter().map(serde_json::to_string).collect()
}

#[async_trait]
impl LogSink for loki::Pusher {
    async fn push(&self, lines: &[LogLine]) -> Result<(), LogSinkError> {
        let encoded = encode_lines(lines)?;
        loki::Pusher::push(self, &encoded).await?;
        Ok(())
    }
}
