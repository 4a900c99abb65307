// Copyright 2025 Vivian Voss. Licensed under the Apache License, Version 2.0.
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic log sink.
//!
//! Human-readable lines appended to a fixed file inside the data directory,
//! each prefixed with a local timestamp. The log is advisory only: it plays
//! no part in the consistency story, and every failure to write it is
//! swallowed so a full disk cannot take the store down with it.

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Log file name inside the data directory.
pub const LOG_FILENAME: &str = "flashkv.log";

/// Append-only diagnostic log.
#[derive(Debug, Clone)]
pub struct DiagLog {
    path: PathBuf,
}

impl DiagLog {
    /// Creates a sink writing to `<dir>/flashkv.log`.
    pub fn new(dir: &Path) -> Self {
        DiagLog {
            path: dir.join(LOG_FILENAME),
        }
    }

    /// Appends one timestamped line. Best effort.
    pub fn line(&self, message: &str) {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let stamp = Local::now().format("%Y-%m-%d %H:%M:%S");
            let _ = writeln!(file, "[{}] {}", stamp, message);
        }
    }

    /// Appends a visual separator marking a fresh process run.
    pub fn run_separator(&self) {
        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&self.path) {
            let _ = writeln!(
                file,
                "\n------------------------------ NEW RUN ------------------------------\n"
            );
        }
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_line_appends_with_timestamp_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let log = DiagLog::new(temp_dir.path());

        log.line("first");
        log.line("second");

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("second"));
    }

    #[test]
    fn test_logging_into_missing_directory_is_silent() {
        let log = DiagLog::new(Path::new("/definitely/not/a/real/dir"));
        // Must not panic or error out.
        log.line("dropped on the floor");
    }
}
