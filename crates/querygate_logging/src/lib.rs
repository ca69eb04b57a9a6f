//! Logging bootstrap for querygate binaries.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "querygate=info,querygate_db=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging options for a querygate binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    /// Mirror the file filter on stderr instead of warnings only.
    pub verbose: bool,
    /// Write a rotated log file under [`logs_dir`].
    pub log_to_file: bool,
}

/// Install the global tracing subscriber.
///
/// stdout is left untouched so it can carry protocol responses.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.to_string()
    } else {
        "warn".to_string()
    };

    let file_layer = if config.log_to_file {
        let dir = ensure_logs_dir().context("Failed to ensure log directory")?;
        let writer = RotatingWriter::open(&dir, config.app_name)
            .with_context(|| format!("Failed to open log file for {}", config.app_name))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new(console_filter)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}

/// Querygate home directory: `$QUERYGATE_HOME` or `~/.querygate`.
pub fn querygate_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("QUERYGATE_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".querygate")
}

/// Logs directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    querygate_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Size-capped log file. `<name>.log` rolls to `<name>.log.1` and so on,
/// keeping at most `max_files` files.
struct RollingFile {
    dir: PathBuf,
    base_name: String,
    max_files: usize,
    max_size: u64,
    file: File,
    size: u64,
}

impl RollingFile {
    fn open(dir: &Path, name: &str, max_files: usize, max_size: u64) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let base_name = sanitize_name(name);
        let (file, size) = open_append(&dir.join(format!("{}.log", base_name)))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            base_name,
            max_files: max_files.max(1),
            max_size,
            file,
            size,
        })
    }

    fn path(&self, index: usize) -> PathBuf {
        if index == 0 {
            self.dir.join(format!("{}.log", self.base_name))
        } else {
            self.dir.join(format!("{}.log.{}", self.base_name, index))
        }
    }

    fn roll(&mut self) -> io::Result<()> {
        self.file.flush()?;
        let last = self.max_files - 1;
        if last > 0 {
            let oldest = self.path(last);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for index in (0..last).rev() {
                let src = self.path(index);
                if src.exists() {
                    fs::rename(&src, self.path(index + 1))?;
                }
            }
        } else {
            fs::remove_file(self.path(0))?;
        }
        let (file, size) = open_append(&self.path(0))?;
        self.file = file;
        self.size = size;
        Ok(())
    }

    fn write_all_rolling(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.size > 0 && self.size + buf.len() as u64 > self.max_size {
            self.roll()?;
        }
        self.file.write_all(buf)?;
        self.size += buf.len() as u64;
        Ok(())
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

/// Cloneable handle handed to `tracing_subscriber` as a `MakeWriter`.
#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<RollingFile>>,
}

impl RotatingWriter {
    fn open(dir: &Path, name: &str) -> io::Result<Self> {
        let file = RollingFile::open(dir, name, MAX_LOG_FILES, MAX_LOG_FILE_SIZE)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        file.write_all_rolling(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut file = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        file.file.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' { ch } else { '_' })
        .collect()
}
