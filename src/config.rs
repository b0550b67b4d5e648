use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::{
    backoff::RetryPolicy,
    logging::{DaemonLog, LogRotation},
    relay::RelaySettings,
    tracker::{StartPosition, TrackerOptions},
};

/// Command line and environment configuration of the relay.
#[derive(Parser, Debug, Clone, Serialize)]
#[command(author, version, about, long_about = None)]
pub struct RelayConfig {
    /// Log file to tail
    #[arg(long, env = "LOG_FILE_PATH")]
    pub log_file_path: PathBuf,

    /// Destination host for datagrams
    #[arg(long, env = "UDP_HOST", default_value = "127.0.0.1")]
    pub udp_host: String,

    /// Destination port for datagrams
    #[arg(long, env = "UDP_PORT", default_value = "514")]
    pub udp_port: u16,

    /// Delay between polls of the log file in milliseconds
    #[arg(long, env = "POLL_INTERVAL_MS", default_value = "100")]
    pub poll_interval_ms: u64,

    /// Longer lines are cut to this many bytes
    #[arg(long, env = "MAX_LINE_LENGTH", default_value = "8192")]
    pub max_line_length: usize,

    /// Interval of the identity health check in milliseconds
    #[arg(long, env = "ROTATION_CHECK_INTERVAL_MS", default_value = "1000")]
    pub rotation_check_interval_ms: u64,

    /// Reopen attempts after the file disappears
    #[arg(long, env = "ROTATION_RETRY_ATTEMPTS", default_value = "5")]
    pub rotation_retry_attempts: u32,

    /// Delay before the first reopen attempt in milliseconds
    #[arg(long, env = "ROTATION_RETRY_DELAY_MS", default_value = "1000")]
    pub rotation_retry_delay_ms: u64,

    /// Factor applied to the delay after every failed attempt
    #[arg(long, env = "ROTATION_RETRY_MULTIPLIER", default_value = "1.5")]
    pub rotation_retry_multiplier: f64,

    /// Upper bound for a single reopen delay in milliseconds
    #[arg(long, env = "ROTATION_RETRY_MAX_DELAY_MS", default_value = "5000")]
    pub rotation_retry_max_delay_ms: u64,

    /// Timeout for a single datagram send in milliseconds
    #[arg(long, env = "SEND_TIMEOUT_MS", default_value = "1000")]
    pub send_timeout_ms: u64,

    /// Interval of statistics reports in seconds
    #[arg(long, env = "STATS_LOG_INTERVAL", default_value = "60")]
    pub stats_interval_secs: u64,

    /// Where to start reading at startup: `end` or `beginning`
    #[arg(long, env = "START_AT", default_value = "end")]
    pub start_at: StartPosition,

    /// Log filter, e.g. `info` or `udp_log_relay=debug`. `RUST_LOG` takes precedence.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Also write the process log to this file; stdout then stays at `info`
    #[arg(long, env = "DAEMON_LOG_FILE")]
    pub daemon_log_file: Option<PathBuf>,

    /// When to roll the daemon log file: `minutely`, `hourly`, `daily` or `never`
    #[arg(long, env = "DAEMON_LOG_ROTATION", default_value = "daily")]
    pub daemon_log_rotation: LogRotation,

    /// Number of daemon log files kept, the current one included
    #[arg(long, env = "LOG_BACKUP_COUNT", default_value = "5")]
    pub log_backup_count: usize,

    /// Print resolved configuration as JSON and exit
    #[serde(skip)]
    #[arg(long)]
    pub show_config: bool,
}

/// Possible errors found while validating configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("UDP port must be between 1 and 65535")]
    InvalidPort,
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("retry multiplier must be a finite number of at least 1, got {0}")]
    InvalidMultiplier(f64),
    #[error("while resolving `{host}:{port}`")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
    #[error("`{host}:{port}` did not resolve to any address")]
    Unresolved { host: String, port: u16 },
}

/// Configuration checked and converted into the types the relay works with.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedConfig {
    pub log_file_path: PathBuf,
    pub destination: SocketAddr,
    pub send_timeout: Duration,
    pub tracker: TrackerOptions,
    pub relay: RelaySettings,
}

impl RelayConfig {
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigError> {
        if self.udp_port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        non_zero("poll_interval_ms", self.poll_interval_ms)?;
        non_zero("max_line_length", self.max_line_length as u64)?;
        non_zero("rotation_check_interval_ms", self.rotation_check_interval_ms)?;
        non_zero("rotation_retry_attempts", self.rotation_retry_attempts.into())?;
        non_zero("send_timeout_ms", self.send_timeout_ms)?;
        non_zero("stats_interval_secs", self.stats_interval_secs)?;
        non_zero("log_backup_count", self.log_backup_count as u64)?;
        if !self.rotation_retry_multiplier.is_finite() || self.rotation_retry_multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(
                self.rotation_retry_multiplier,
            ));
        }

        if let Some(parent) = self.log_file_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                warn!(directory = %parent.display(), "log file directory does not exist");
            }
        }

        Ok(ValidatedConfig {
            log_file_path: self.log_file_path.clone(),
            destination: self.resolve_destination()?,
            send_timeout: Duration::from_millis(self.send_timeout_ms),
            tracker: TrackerOptions {
                max_line_length: self.max_line_length,
                start_at: self.start_at,
            },
            relay: RelaySettings {
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                rotation_check_interval: Duration::from_millis(self.rotation_check_interval_ms),
                stats_interval: Duration::from_secs(self.stats_interval_secs),
                retry: RetryPolicy {
                    attempts: self.rotation_retry_attempts,
                    initial_delay: Duration::from_millis(self.rotation_retry_delay_ms),
                    multiplier: self.rotation_retry_multiplier,
                    max_delay: (self.rotation_retry_max_delay_ms > 0)
                        .then(|| Duration::from_millis(self.rotation_retry_max_delay_ms)),
                },
            },
        })
    }

    /// Daemon log settings, when a file was configured. Available before validation so logging can start first.
    pub fn daemon_log(&self) -> Option<DaemonLog> {
        self.daemon_log_file.as_ref().map(|path| DaemonLog {
            path: path.clone(),
            rotation: self.daemon_log_rotation,
            max_files: self.log_backup_count.max(1),
        })
    }

    fn resolve_destination(&self) -> Result<SocketAddr, ConfigError> {
        let mut addrs = (self.udp_host.as_str(), self.udp_port)
            .to_socket_addrs()
            .map_err(|source| ConfigError::Resolve {
                host: self.udp_host.clone(),
                port: self.udp_port,
                source,
            })?;
        addrs.next().ok_or_else(|| ConfigError::Unresolved {
            host: self.udp_host.clone(),
            port: self.udp_port,
        })
    }
}

fn non_zero(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero(name));
    }
    Ok(())
}
