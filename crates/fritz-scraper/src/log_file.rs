// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use fritzbox::model::LogLine;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::sink::encode_lines;

/// Append-only local copy of forwarded log lines.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LogFile { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the file, discarding lines left over from a previous run.
    pub fn truncate(&self) -> io::Result<()> {
        File::create(&self.path).map(drop)
    }

    /// Appends one JSON object per line and syncs before returning.
    pub fn append(&self, lines: &[LogLine]) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        let mut out = String::new();
        for line in encode_lines(lines)? {
            out.push_str(&line);
            out.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(out.as_bytes())?;
        file.sync_all()
    }
}
