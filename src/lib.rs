//! # UDP log relay
//!
//! Follows a single log file the way `tail -F` does and forwards every complete line as one UDP datagram.
//! Rotation by rename, truncation and recreation of the file are detected and survived without a restart.
//!
//! * `FileTracker` reads complete lines appended to a file and notices when the file behind the path changes
//!
//! ```rust no_run
//! # use udp_log_relay::{FileTracker, StartPosition, TrackerOptions};
//! let options = TrackerOptions { max_line_length: 8192, start_at: StartPosition::Beginning };
//! let mut tracker = FileTracker::open("/var/log/app.log", options);
//! let outcome = tracker.poll();
//! for line in &outcome.lines {
//!     println!("{}", String::from_utf8_lossy(&line.bytes));
//! }
//! if let Some(reason) = outcome.rotation {
//!     println!("file rotated: {reason}");
//! }
//! ```
//!
//! * `RetryPolicy` describes how long to wait between attempts to reopen a file that went missing
//!
//! ```rust
//! # use std::time::Duration;
//! # use udp_log_relay::RetryPolicy;
//! let policy = RetryPolicy::default();
//! let delays: Vec<_> = policy.delays().map(|d| d.as_millis()).collect();
//! assert_eq!(delays, vec![1000, 1500, 2250, 3375, 5000]);
//! ```
//!
//! * `RelayLoop` ties a tracker to a `Sender` and runs until a `ShutdownSignal` fires
//!
//! ```rust no_run
//! # use std::{sync::Arc, time::Duration};
//! # use udp_log_relay::*;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let shutdown = ShutdownSignal::new();
//! let _signals = install_signal_handlers(shutdown.clone())?;
//! let sender = UdpSender::new("127.0.0.1:514".parse()?, Duration::from_secs(1))?;
//! let tracker = FileTracker::open("/var/log/app.log", TrackerOptions::default());
//! let mut relay = RelayLoop::new(
//!     tracker,
//!     sender,
//!     Arc::new(RelayStats::new()),
//!     shutdown.clone(),
//!     shutdown,
//!     RelaySettings::default(),
//! );
//! relay.run();
//! # Ok(())
//! # }
//! ```
//!

mod backoff;
pub mod config;
mod identity;
mod lines;
pub mod logging;
mod metrics;
pub mod receiver;
mod relay;
mod sender;
mod shutdown;
mod tracker;

pub use backoff::{RetryPolicy, Sleeper};
pub use config::{ConfigError, RelayConfig, ValidatedConfig};
pub use identity::{FileIdentity, FileStat};
pub use lines::{split_complete_lines, Line, SplitLines};
pub use metrics::{MetricsSink, RelayStats, StatsSnapshot};
pub use relay::{RelayLoop, RelaySettings, RelayState};
pub use sender::{Sender, SenderError, UdpSender};
pub use shutdown::{install_signal_handlers, ShutdownSignal};
pub use tracker::{
    FileTracker, ParseStartPositionError, PollOutcome, ReopenOutcome, RotationReason,
    StartPosition, TrackerOptions, TrackerState,
};
