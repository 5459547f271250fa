//! The CSV log of file samples.

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::types::{ConstantModeId, SampleReading};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Error, Debug)]
pub enum LogFileError {
    #[error("Log file \"{}\" already exists", .0.display())]
    AlreadyExists(PathBuf),
    #[error(
        "Log data cannot be saved to \"{}\", insufficient privileges. Please verify that you have write access or select new location for log file.",
        .0.display()
    )]
    AccessDenied(PathBuf),
    #[error("I/O error on \"{}\": {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl LogFileError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::PermissionDenied => LogFileError::AccessDenied(path.to_path_buf()),
            io::ErrorKind::AlreadyExists => LogFileError::AlreadyExists(path.to_path_buf()),
            _ => LogFileError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// What to do with a log file that may already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilePolicy {
    /// Start a new file; an existing one is an error.
    Create,
    /// Keep existing rows and add to the end.
    #[default]
    Append,
    /// Delete the existing file first.
    Replace,
}

/// `path`, with `.csv` added when it has no extension.
pub fn with_default_extension(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if path.extension().is_some() {
        path.to_path_buf()
    } else {
        path.with_extension("csv")
    }
}

/// One row of the log. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub voltage: f64,
    pub power: f64,
    pub current: f64,
    /// Lower-case mode code, empty when the mode is not known.
    pub mode: Option<&'static str>,
    /// Whole seconds since logging started.
    pub total_seconds: i64,
}

impl LogRecord {
    pub fn new(
        reading: &SampleReading,
        mode: Option<ConstantModeId>,
        now: DateTime<Local>,
        started: DateTime<Local>,
    ) -> Self {
        Self {
            timestamp: now.format(TIMESTAMP_FORMAT).to_string(),
            voltage: reading.voltage,
            power: reading.power,
            current: reading.current,
            mode: mode.map(ConstantModeId::code),
            total_seconds: (now - started).num_seconds().max(0),
        }
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: mode: {}, voltage: {} V, power: {} W, current: {} A",
            self.timestamp,
            self.mode.map(str::to_uppercase).as_deref().unwrap_or("N/A"),
            self.voltage,
            self.power,
            self.current
        )
    }
}

/// An open log file.
pub struct LogWriter {
    path: PathBuf,
    writer: csv::Writer<File>,
}

impl LogWriter {
    /// Open the log at `path` according to `policy`.
    ///
    /// The header row is written only when the file is empty.
    pub fn open(path: impl AsRef<Path>, policy: FilePolicy) -> Result<Self, LogFileError> {
        let path = with_default_extension(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LogFileError::from_io(parent, e))?;
        }

        let mut options = OpenOptions::new();
        options.append(true);
        match policy {
            FilePolicy::Create => {
                options.create_new(true);
            }
            FilePolicy::Append => {
                options.create(true);
            }
            FilePolicy::Replace => {
                match fs::remove_file(&path) {
                    Ok(()) => info!(path = %path.display(), "replacing log file"),
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(LogFileError::from_io(&path, e)),
                }
                options.create(true);
            }
        }

        let file = options
            .open(&path)
            .map_err(|e| LogFileError::from_io(&path, e))?;
        let empty = file
            .metadata()
            .map_err(|e| LogFileError::from_io(&path, e))?
            .len()
            == 0;
        let writer = csv::WriterBuilder::new()
            .has_headers(empty)
            .from_writer(file);

        info!(path = %path.display(), ?policy, "log file open");
        Ok(Self { path, writer })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one row and flush it to disk.
    pub fn append(&mut self, record: &LogRecord) -> Result<(), LogFileError> {
        self.writer.serialize(record)?;
        self.writer
            .flush()
            .map_err(|e| LogFileError::from_io(&self.path, e))
    }

    pub fn close(mut self) -> Result<(), LogFileError> {
        self.writer
            .flush()
            .map_err(|e| LogFileError::from_io(&self.path, e))?;
        info!(path = %self.path.display(), "log file closed");
        Ok(())
    }
}
