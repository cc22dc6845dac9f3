//! Per-run log file
//!
//! A [`RunLog`] appends to `log_YYYY-MM-DD.txt` in the log directory. While
//! the guard returned by [`RunLog::install`] is alive, every tracing event is
//! written both to stdout and to that file.

use chrono::NaiveDate;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{Error, Result};

/// Append-only log file for one day's runs
#[derive(Clone)]
pub struct RunLog {
    path: PathBuf,
    file: Arc<Mutex<BufWriter<File>>>,
}

impl std::fmt::Debug for RunLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLog").field("path", &self.path).finish()
    }
}

impl RunLog {
    /// Open (or create) the log file for `date` under `log_dir`
    pub fn open(log_dir: &Path, date: NaiveDate) -> Result<Self> {
        std::fs::create_dir_all(log_dir).map_err(|e| Error::Config {
            message: format!("cannot create log directory {}: {}", log_dir.display(), e),
            key: Some("log_dir".to_string()),
        })?;

        let path = log_dir.join(format!("log_{}.txt", date.format("%Y-%m-%d")));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;

        Ok(Self {
            path,
            file: Arc::new(Mutex::new(BufWriter::new(file))),
        })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Route tracing events to stdout and this file until the guard drops
    ///
    /// The subscriber is installed for the current thread, so the run must be
    /// driven from it (a current-thread runtime).
    pub fn install(&self, filter: EnvFilter) -> RunLogGuard {
        let file_log = self.clone();
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(io::stdout))
            .with(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(move || file_log.writer()),
            );

        RunLogGuard {
            _subscriber: tracing::subscriber::set_default(subscriber),
            log: self.clone(),
        }
    }

    /// Append a block of text verbatim, bypassing the subscriber
    pub fn write_block(&self, text: &str) -> io::Result<()> {
        let mut writer = self.writer();
        writer.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }

    /// Write a banner line, e.g. at the start or end of a run
    pub fn banner(&self, title: &str) -> io::Result<()> {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        self.write_block(&format!("===== {} ({}) =====", title, now))
    }

    /// Flush buffered output to disk
    pub fn flush(&self) -> io::Result<()> {
        self.writer().flush()
    }

    fn writer(&self) -> RunLogWriter {
        RunLogWriter {
            file: Arc::clone(&self.file),
        }
    }
}

/// Keeps a [`RunLog`] installed; flushes the file when dropped
#[must_use = "the run log is uninstalled when the guard is dropped"]
pub struct RunLogGuard {
    _subscriber: DefaultGuard,
    log: RunLog,
}

impl Drop for RunLogGuard {
    fn drop(&mut self) {
        let _ = self.log.flush();
    }
}

struct RunLogWriter {
    file: Arc<Mutex<BufWriter<File>>>,
}

impl Write for RunLogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("run log lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .lock()
            .map_err(|_| io::Error::other("run log lock poisoned"))?
            .flush()
    }
}
