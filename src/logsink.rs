//! Per-run log directory, created lazily under the configured logs root.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Local;

pub struct LogSink {
    base: PathBuf,
    created: Mutex<bool>,
}

impl LogSink {
    /// `logs_dir` is the configured logs root; the run directory is named
    /// after the current local time and created on first `open()`.
    pub fn new(logs_dir: &Path) -> Self {
        let stamp = Local::now().format("%Y-%m-%d_%Hh%Mm%Ss").to_string();

        LogSink {
            base: logs_dir.join(stamp),
            created: Mutex::new(false),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Open `relative_path` under the run directory for writing, creating
    /// intermediate directories (including the run directory itself, on
    /// first use) as needed.
    pub fn open(&self, relative_path: &str) -> Result<File> {
        let mut created = self.created.lock().unwrap();

        if !*created {
            fs::create_dir_all(&self.base)
                .with_context(|| format!("failed to create {}", self.base.display()))?;
            *created = true;
        }

        let path = self.base.join(relative_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        File::create(&path).with_context(|| format!("failed to open {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_run_directory_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path());

        assert!(!sink.base().exists());

        sink.open("web/makejail.log").unwrap();

        assert!(sink.base().exists());
        assert!(sink.base().join("web/makejail.log").is_file());
    }
}
