//! Shared logging bootstrap for Gridway binaries.
//!
//! Both the gateway and the worker agent log to stderr (env-filtered) and to
//! a size-rotated file under the Gridway home directory.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "gridway=info,gridway_scheduler=info,gridway_worker=info";
const MAX_LOG_FILES: usize = 4;
const MAX_LOG_FILE_SIZE: u64 = 8 * 1024 * 1024;

/// Logging configuration shared by Gridway binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
}

/// Initialize tracing with a rotating file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let writer = RotatingWriter::open(log_dir, config.app_name)
        .context("Failed to initialize rotating log writer")?;

    let file_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let console_filter = if config.verbose {
        file_filter.clone()
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}

/// Gridway home directory: $GRIDWAY_HOME or ~/.gridway
pub fn gridway_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("GRIDWAY_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gridway")
}

/// Logs directory: <home>/logs
pub fn logs_dir() -> PathBuf {
    gridway_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Appends to `<dir>/<name>.log`, shifting to `<name>.log.1` .. `.N` when the
/// active file exceeds the size cap. Shared across layers via a mutex.
#[derive(Clone)]
struct RotatingWriter {
    inner: Arc<Mutex<RotatingState>>,
}

struct RotatingState {
    dir: PathBuf,
    base_name: String,
    file: File,
    written: u64,
}

impl RotatingWriter {
    fn open(dir: PathBuf, app_name: &str) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let base_name = sanitize_name(app_name);
        let path = dir.join(format!("{}.log", base_name));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            inner: Arc::new(Mutex::new(RotatingState {
                dir,
                base_name,
                file,
                written,
            })),
        })
    }
}

impl RotatingState {
    fn current_path(&self) -> PathBuf {
        self.dir.join(format!("{}.log", self.base_name))
    }

    fn rotated_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}.log.{}", self.base_name, index))
    }

    fn rotate(&mut self) -> io::Result<()> {
        let _ = self.file.flush();

        let oldest = self.rotated_path(MAX_LOG_FILES - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for index in (1..MAX_LOG_FILES - 1).rev() {
            let src = self.rotated_path(index);
            if src.exists() {
                fs::rename(&src, self.rotated_path(index + 1))?;
            }
        }
        let current = self.current_path();
        if current.exists() {
            fs::rename(&current, self.rotated_path(1))?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.current_path())?;
        self.written = 0;
        Ok(())
    }

    fn write_all_rotating(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.rotate()?;
        }
        let bytes = self.file.write(buf)?;
        self.written += bytes as u64;
        Ok(bytes)
    }
}

impl Write for RotatingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        state.write_all_rotating(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        state.file.flush()
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for RotatingWriter {
    type Writer = RotatingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("gridway"), "gridway");
        assert_eq!(sanitize_name("grid way/agent"), "grid_way_agent");
    }

    #[test]
    fn test_writer_appends_and_tracks_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = RotatingWriter::open(dir.path().to_path_buf(), "test").unwrap();
        writer.write_all(b"hello\n").unwrap();
        writer.flush().unwrap();

        let content = fs::read_to_string(dir.path().join("test.log")).unwrap();
        assert_eq!(content, "hello\n");
        assert_eq!(writer.inner.lock().unwrap().written, 6);
    }

    #[test]
    fn test_rotation_shifts_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RotatingWriter::open(dir.path().to_path_buf(), "test").unwrap();
        {
            let mut state = writer.inner.lock().unwrap();
            state.file.write_all(b"first generation").unwrap();
            state.rotate().unwrap();
            state.file.write_all(b"second generation").unwrap();
        }

        let rotated = fs::read_to_string(dir.path().join("test.log.1")).unwrap();
        assert_eq!(rotated, "first generation");
    }
}
