//! Post-failure diagnostics.
//!
//! When Create, Provision, or Configure fails, the node's serial console is
//! appended to `<dir>/<target>-<timestamp>-console.log`. Capture problems are
//! logged and swallowed so the original error always reaches the caller.

use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::fs::OpenOptions;
use cap_std::{ambient_authority, fs_utf8::Dir};
use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cloud::CloudApi;

/// Errors raised while persisting console output.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CaptureError {
    /// Raised when the log directory or file cannot be written.
    #[error("failed to write console log {path}: {message}")]
    Io {
        /// Path that could not be written.
        path: Utf8PathBuf,
        /// Error message returned by the filesystem.
        message: String,
    },
}

/// Writes console output for failed nodes into a local directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsoleLogCapture {
    dir: Utf8PathBuf,
}

impl ConsoleLogCapture {
    /// Captures into `dir`.
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory receiving console logs.
    #[must_use]
    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// File name used for `target` at `now`.
    #[must_use]
    pub fn file_name(target: &str, now: DateTime<Local>) -> String {
        format!("{target}-{}-console.log", now.format("%Y%m%d_%H%M%S"))
    }

    /// Fetches the console of `target` and appends it to a timestamped log.
    ///
    /// Returns the path written, or `None` when there was nothing to write
    /// or any step failed.
    pub async fn capture<C: CloudApi>(&self, cloud: &C, target: &str) -> Option<Utf8PathBuf> {
        if target.is_empty() {
            return None;
        }
        let console = match cloud.console_output(target).await {
            Ok(Some(console)) if !console.is_empty() => console,
            Ok(_) => {
                debug!(node = %target, "no console output available");
                return None;
            }
            Err(err) => {
                warn!(node = %target, error = %err, "failed to fetch console output");
                return None;
            }
        };

        match self.append(target, &console, Local::now()) {
            Ok(path) => {
                warn!(node = %target, %path, "dumped latest console output");
                Some(path)
            }
            Err(err) => {
                warn!(node = %target, error = %err, "failed to persist console output");
                None
            }
        }
    }

    /// Appends `console` plus a trailing newline to the log for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Io`] when the directory cannot be opened or
    /// the file cannot be written.
    pub fn append(
        &self,
        target: &str,
        console: &str,
        now: DateTime<Local>,
    ) -> Result<Utf8PathBuf, CaptureError> {
        let name = Self::file_name(target, now);
        let path = self.dir.join(&name);
        let io_error = |err: io::Error| CaptureError::Io {
            path: path.clone(),
            message: err.to_string(),
        };

        let dir = Dir::open_ambient_dir(&self.dir, ambient_authority()).map_err(io_error)?;
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        let mut file = dir.open_with(&name, &options).map_err(io_error)?;
        file.write_all(console.as_bytes()).map_err(io_error)?;
        file.write_all(b"\n").map_err(io_error)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::test_support::{SimNode, SimulatedFleet, sample_host};

    fn temp_capture() -> (TempDir, ConsoleLogCapture) {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("temp dir: {err}"));
        let dir = Utf8PathBuf::from_path_buf(tmp.path().to_path_buf())
            .unwrap_or_else(|path| panic!("non-utf8 temp dir: {}", path.display()));
        (tmp, ConsoleLogCapture::new(dir))
    }

    #[test]
    fn file_name_embeds_timestamp() {
        let now = Local
            .with_ymd_and_hms(2024, 3, 9, 14, 5, 7)
            .single()
            .unwrap_or_else(|| panic!("unambiguous local time"));
        assert_eq!(
            ConsoleLogCapture::file_name("db-n1", now),
            "db-n1-20240309_140507-console.log"
        );
    }

    #[test]
    fn append_accumulates_output() {
        let (_tmp, capture) = temp_capture();
        let now = Local::now();

        capture
            .append("db-n1", "first", now)
            .unwrap_or_else(|err| panic!("first append: {err}"));
        let path = capture
            .append("db-n1", "second", now)
            .unwrap_or_else(|err| panic!("second append: {err}"));

        let contents = std::fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("read console log: {err}"));
        assert_eq!(contents, "first\nsecond\n");
    }

    #[tokio::test]
    async fn capture_writes_console_from_cloud() {
        let (_tmp, capture) = temp_capture();
        let fleet = SimulatedFleet::new();
        fleet.add_node(SimNode::new(sample_host("db-n1", true)).with_console("kernel panic"));

        let path = capture
            .capture(&fleet.cloud(), "db-n1")
            .await
            .unwrap_or_else(|| panic!("console should be captured"));

        assert!(path.as_str().ends_with("-console.log"));
        let contents = std::fs::read_to_string(&path)
            .unwrap_or_else(|err| panic!("read console log: {err}"));
        assert_eq!(contents, "kernel panic\n");
    }

    #[tokio::test]
    async fn capture_is_silent_without_console() {
        let (_tmp, capture) = temp_capture();
        let fleet = SimulatedFleet::new();
        fleet.add_node(SimNode::new(sample_host("db-n1", true)));

        assert_eq!(capture.capture(&fleet.cloud(), "db-n1").await, None);
    }

    #[tokio::test]
    async fn capture_swallows_missing_directory() {
        let capture = ConsoleLogCapture::new("/nonexistent/nodekeeper-console");
        let fleet = SimulatedFleet::new();
        fleet.add_node(SimNode::new(sample_host("db-n1", true)).with_console("boot log"));

        assert_eq!(capture.capture(&fleet.cloud(), "db-n1").await, None);
    }
}
