//! Small UDP listener that prints what the relay sends. Meant for checking a deployment by eye.

use std::{
    io,
    net::{SocketAddr, UdpSocket},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use clap::Parser;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Parser, Debug, Clone, Serialize)]
#[command(author, version, about = "Print datagrams sent by udp-log-relay", long_about = None)]
pub struct ReceiverConfig {
    /// Address to bind to
    #[arg(long, env = "RECEIVER_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "RECEIVER_PORT", default_value = "514")]
    pub port: u16,

    /// Receive buffer size; longer datagrams are cut by the socket
    #[arg(long, env = "RECEIVER_BUFFER_SIZE", default_value = "65535")]
    pub buffer_size: usize,

    /// Log a statistics line every this many messages
    #[arg(long, env = "RECEIVER_STATS_INTERVAL", default_value = "10")]
    pub stats_interval: u64,

    /// Socket read timeout in milliseconds; bounds how long shutdown takes
    #[arg(long, env = "RECEIVER_SOCKET_TIMEOUT_MS", default_value = "1000")]
    pub socket_timeout_ms: u64,

    /// Prefix messages with local receive time
    #[arg(long, env = "RECEIVER_SHOW_TIMESTAMP", default_value_t = true, action = clap::ArgAction::Set)]
    pub show_timestamp: bool,

    /// Prefix messages with sender address
    #[arg(long, env = "RECEIVER_SHOW_SOURCE", default_value_t = true, action = clap::ArgAction::Set)]
    pub show_source: bool,

    /// Messages longer than this many characters are shortened for display
    #[arg(long, env = "RECEIVER_MAX_MESSAGE_LENGTH", default_value = "1000")]
    pub max_message_length: usize,

    /// Log filter; `RUST_LOG` takes precedence
    #[arg(long, env = "RECEIVER_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Print configuration as JSON and exit
    #[serde(skip)]
    #[arg(long)]
    pub show_config: bool,
}

#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("while binding {addr}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("while configuring socket")]
    Socket(#[from] io::Error),
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub messages: u64,
    pub bytes: u64,
}

/// Bound socket plus display settings.
pub struct Receiver {
    socket: UdpSocket,
    config: ReceiverConfig,
    buf: Vec<u8>,
    stats: ReceiverStats,
    started: Instant,
}

impl Receiver {
    pub fn bind(config: ReceiverConfig) -> Result<Self, ReceiverError> {
        if config.buffer_size == 0 {
            return Err(ReceiverError::Zero("buffer_size"));
        }
        if config.socket_timeout_ms == 0 {
            return Err(ReceiverError::Zero("socket_timeout_ms"));
        }
        let addr = format!("{}:{}", config.host, config.port);
        let socket = UdpSocket::bind(&addr).map_err(|source| ReceiverError::Bind {
            addr: addr.clone(),
            source,
        })?;
        socket.set_read_timeout(Some(Duration::from_millis(config.socket_timeout_ms)))?;
        info!(%addr, "UDP receiver listening");
        Ok(Self {
            socket,
            buf: vec![0; config.buffer_size],
            config,
            stats: ReceiverStats::default(),
            started: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Wait for one datagram and return it formatted for display, or `None` when the read timed out.
    pub fn receive(&mut self) -> io::Result<Option<String>> {
        let (len, from) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Ok(None)
            }
            Err(e) => return Err(e),
        };
        self.stats.messages += 1;
        self.stats.bytes += len as u64;
        debug!(bytes = len, %from, "received datagram");

        if self.config.stats_interval > 0 && self.stats.messages % self.config.stats_interval == 0 {
            self.log_stats();
        }

        Ok(Some(format_message(
            &self.buf[..len],
            from,
            self.config.show_timestamp.then(Local::now),
            self.config.show_source,
            self.config.max_message_length,
        )))
    }

    pub fn log_stats(&self) {
        let uptime = self.started.elapsed().as_secs_f64();
        let (messages_per_sec, bytes_per_sec) = if uptime > 0.0 {
            (
                self.stats.messages as f64 / uptime,
                self.stats.bytes as f64 / uptime,
            )
        } else {
            (0.0, 0.0)
        };
        info!(
            messages = self.stats.messages,
            bytes = self.stats.bytes,
            messages_per_sec,
            bytes_per_sec,
            "receiver statistics"
        );
    }
}

/// Render `[time] -> addr -> message`, leaving out the parts that are switched off.
pub fn format_message(
    data: &[u8],
    from: SocketAddr,
    received_at: Option<DateTime<Local>>,
    show_source: bool,
    max_len: usize,
) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(at) = received_at {
        parts.push(format!("[{}]", at.format("%Y-%m-%d %H:%M:%S%.3f")));
    }
    if show_source {
        parts.push(from.to_string());
    }
    let message = String::from_utf8_lossy(data);
    if message.chars().count() > max_len {
        let cut: String = message.chars().take(max_len).collect();
        parts.push(format!("{cut}... [truncated]"));
    } else {
        parts.push(message.into_owned());
    }
    parts.join(" -> ")
}
