//! Logging setup shared by the reconflow binaries.
//!
//! Two sinks are installed: a size-rotated log file under the reconflow
//! home directory and a human-readable stderr layer. Long pipeline runs
//! stream the external tool's output through `tracing`, so the file log
//! is the complete record of a run.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "reconflow=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for a reconflow binary.
#[derive(Debug, Clone)]
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Force debug output on the console layer.
    pub verbose: bool,
    /// Directory for the rotated log file. Defaults to [`logs_dir`].
    pub log_dir: Option<PathBuf>,
}

/// Install the global subscriber. Call once, before any stage runs.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = match config.log_dir {
        Some(dir) => dir,
        None => logs_dir(),
    };
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create logs directory: {}", log_dir.display()))?;
    let file_writer = RotatingWriter::open(&log_dir, config.app_name)
        .with_context(|| format!("Failed to open log file in {}", log_dir.display()))?;

    let file_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        EnvFilter::new("reconflow=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .try_init()
        .context("A global tracing subscriber is already installed")?;

    Ok(())
}

/// Home directory for reconflow state: `$RECONFLOW_HOME` or `~/.reconflow`.
pub fn reconflow_home() -> PathBuf {
    if let Ok(path) = std::env::var("RECONFLOW_HOME") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".reconflow")
}

/// Default log directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    reconflow_home().join("logs")
}

/// Append-only log file that rolls over to `<name>.log.1 .. .N` once it
/// grows past the size limit.
struct RotatingFile {
    dir: PathBuf,
    stem: String,
    keep: usize,
    limit: u64,
    file: Option<File>,
    written: u64,
}

impl RotatingFile {
    fn open(dir: &Path, name: &str, keep: usize, limit: u64) -> io::Result<Self> {
        let mut log = Self {
            dir: dir.to_path_buf(),
            stem: safe_stem(name),
            keep: keep.max(1),
            limit,
            file: None,
            written: 0,
        };
        log.reopen()?;
        if log.written > log.limit {
            log.roll()?;
        }
        Ok(log)
    }

    fn path(&self, generation: usize) -> PathBuf {
        if generation == 0 {
            self.dir.join(format!("{}.log", self.stem))
        } else {
            self.dir.join(format!("{}.log.{}", self.stem, generation))
        }
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path(0))?;
        self.written = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    fn roll(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }
        // Shift generations from oldest to newest; generation 0 becomes 1.
        let oldest = self.keep - 1;
        for generation in (0..oldest).rev() {
            let from = self.path(generation);
            if from.exists() {
                fs::rename(&from, self.path(generation + 1))?;
            }
        }
        if oldest == 0 {
            let _ = fs::remove_file(self.path(0));
        }
        self.reopen()
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.limit {
            self.roll()?;
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "log file unavailable"))?;
        let n = file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<RotatingFile>>,
}

impl RotatingWriter {
    fn open(dir: &Path, name: &str) -> io::Result<Self> {
        let file = RotatingFile::open(dir, name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }

    fn with_file<T>(&self, f: impl FnOnce(&mut RotatingFile) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        f(&mut guard)
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(|file| file.flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn safe_stem(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
