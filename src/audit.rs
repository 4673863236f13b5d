//! JSON-lines audit log of monitor events.
//!
//! The daemon subscribes to the event stream and appends every event as one
//! self-contained JSON object per line, which makes the history easy to
//! grep, stream, and post-process.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};

use crate::event::MonitorEvent;

pub struct AuditLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl AuditLog {
    /// Open the log for appending, creating parent directories as needed.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn record(&self, event: &MonitorEvent) -> Result<()> {
        let json = serde_json::to_string(event).context("failed to serialize event")?;
        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{json}").context("failed to write audit entry")?;
        writer.flush().context("failed to flush audit log")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
