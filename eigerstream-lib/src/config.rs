//! Archiver configuration.
//!
//! The config file is JSON; the recognized options all live under the
//! `/archiver` subtree and every one of them is optional, falling back to the
//! defaults below. The loaded [`Settings`] value is owned by the caller and
//! passed into constructors; there is no process-global configuration state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::Value;

use crate::stream::{DEFAULT_POLL_INTERVAL, DEFAULT_RECV_BUFFER_LEN};
use crate::{Error, Result};

/// Recognized archiver options.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `/archiver/source/zmq_push_socket`: the DCU's push endpoint.
    pub endpoint: String,
    /// `/archiver/source/read_buffer_mb`, converted to bytes.
    pub recv_buffer_len: usize,
    /// `/archiver/source/poll_interval`, seconds of idle between heartbeats.
    pub poll_interval: Duration,
    /// `/archiver/source/workers`: transport I/O thread count.
    pub io_threads: i32,
    /// `/archiver/source/using_header_appendix`: expect a per-series
    /// appendix part.
    pub using_header_appendix: bool,
    /// `/archiver/source/using_image_appendix`: expect a per-frame appendix
    /// part.
    pub using_image_appendix: bool,
    /// `/archiver/sink/directory`: where image files land.
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            endpoint: "tcp://localhost:9999".to_string(),
            recv_buffer_len: DEFAULT_RECV_BUFFER_LEN,
            poll_interval: DEFAULT_POLL_INTERVAL,
            io_threads: 1,
            using_header_appendix: false,
            using_image_appendix: false,
            output_dir: PathBuf::from("."),
        }
    }
}

impl Settings {
    /// Load settings from a JSON config file.
    ///
    /// # Errors
    /// [`Error::Config`] when the file cannot be read, is not valid JSON, or
    /// carries a recognized option of the wrong type.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| Error::Config(format!("config file {}: {err}", path.display())))?;
        let root: Value = serde_json::from_str(&text)
            .map_err(|err| Error::Config(format!("config file {}: {err}", path.display())))?;
        Settings::from_json(&root)
    }

    /// Read the recognized options out of a parsed config document.
    ///
    /// Absent options keep their defaults; a present option of the wrong
    /// JSON type is an error rather than a silent fallback.
    ///
    /// # Errors
    /// [`Error::Config`] on a mistyped option.
    pub fn from_json(root: &Value) -> Result<Self> {
        let mut settings = Settings::default();
        if let Some(v) = root.pointer("/archiver/source/zmq_push_socket") {
            settings.endpoint = v
                .as_str()
                .ok_or_else(|| mistyped("/archiver/source/zmq_push_socket", "a string", v))?
                .to_string();
        }
        if let Some(v) = root.pointer("/archiver/source/read_buffer_mb") {
            let mb = v.as_u64().ok_or_else(|| {
                mistyped("/archiver/source/read_buffer_mb", "a positive integer", v)
            })?;
            settings.recv_buffer_len = usize::try_from(mb * 1024 * 1024).map_err(|_| {
                mistyped("/archiver/source/read_buffer_mb", "a sane buffer size", v)
            })?;
        }
        if let Some(v) = root.pointer("/archiver/source/poll_interval") {
            let secs = v.as_u64().ok_or_else(|| {
                mistyped("/archiver/source/poll_interval", "a positive integer", v)
            })?;
            settings.poll_interval = Duration::from_secs(secs);
        }
        if let Some(v) = root.pointer("/archiver/source/workers") {
            let workers = v
                .as_u64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(|| mistyped("/archiver/source/workers", "a positive integer", v))?;
            settings.io_threads = workers;
        }
        if let Some(v) = root.pointer("/archiver/source/using_header_appendix") {
            settings.using_header_appendix = v
                .as_bool()
                .ok_or_else(|| mistyped("/archiver/source/using_header_appendix", "a bool", v))?;
        }
        if let Some(v) = root.pointer("/archiver/source/using_image_appendix") {
            settings.using_image_appendix = v
                .as_bool()
                .ok_or_else(|| mistyped("/archiver/source/using_image_appendix", "a bool", v))?;
        }
        if let Some(v) = root.pointer("/archiver/sink/directory") {
            settings.output_dir = v
                .as_str()
                .ok_or_else(|| mistyped("/archiver/sink/directory", "a string", v))?
                .into();
        }
        Ok(settings)
    }
}

fn mistyped(pointer: &str, expected: &str, got: &Value) -> Error {
    Error::Config(format!("{pointer}: expected {expected}, got {got}"))
}
