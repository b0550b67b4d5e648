use std::{fs, io, path::PathBuf, str::FromStr};

use serde::Serialize;
use thiserror::Error;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{InitError, RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::{LevelFilter, ParseError},
    fmt,
    prelude::*,
    util::TryInitError,
    EnvFilter,
};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("invalid log filter")]
    Filter(#[from] ParseError),
    #[error("while creating log directory {path}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("while opening daemon log file")]
    Appender(#[from] InitError),
    #[error("daemon log path {0} has no file name")]
    NoFileName(PathBuf),
    #[error("while installing global subscriber")]
    Init(#[from] TryInitError),
}

/// How often the daemon log file is rolled over.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Error, Debug)]
#[error("unknown log rotation `{0}`, expected `minutely`, `hourly`, `daily` or `never`")]
pub struct ParseLogRotationError(String);

impl FromStr for LogRotation {
    type Err = ParseLogRotationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "minutely" => Ok(Self::Minutely),
            "hourly" => Ok(Self::Hourly),
            "daily" => Ok(Self::Daily),
            "never" => Ok(Self::Never),
            _ => Err(ParseLogRotationError(s.to_string())),
        }
    }
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// Where the process writes its own log in addition to stdout.
///
/// Rolled files are named after `path` with a date suffix (none for `LogRotation::Never`); only the newest
/// `max_files` are kept.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DaemonLog {
    pub path: PathBuf,
    pub rotation: LogRotation,
    pub max_files: usize,
}

impl DaemonLog {
    pub fn appender(&self) -> Result<RollingFileAppender, LoggingError> {
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| LoggingError::NoFileName(self.path.clone()))?;
        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&directory).map_err(|source| LoggingError::Directory {
            path: directory.clone(),
            source,
        })?;

        Ok(RollingFileAppender::builder()
            .rotation(self.rotation.into())
            .filename_prefix(file_name.to_string_lossy())
            .max_log_files(self.max_files)
            .build(directory)?)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` (a level such as `info`, or full directives) is used.
/// With a daemon log the file receives everything the filter lets through while stdout stays at `info`.
/// The returned guard flushes the file writer and must be held until exit.
pub fn init(
    default_filter: &str,
    daemon_log: Option<&DaemonLog>,
) -> Result<Option<WorkerGuard>, LoggingError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };

    let (file_layer, guard) = match daemon_log {
        Some(log) => {
            let (writer, guard) = tracing_appender::non_blocking(log.appender()?);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    let console_level = if daemon_log.is_some() {
        LevelFilter::INFO
    } else {
        LevelFilter::TRACE
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(console_level),
        )
        .with(file_layer)
        .try_init()?;
    Ok(guard)
}
