use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{
    backoff::{RetryPolicy, Sleeper},
    lines::Line,
    metrics::MetricsSink,
    sender::Sender,
    shutdown::ShutdownSignal,
    tracker::{FileTracker, PollOutcome, ReopenOutcome, RotationReason},
};

/// Relay lifecycle as seen from outside.
///
/// `Rotating` is transient: it lasts for the cycle that noticed the rotation and collapses into
/// `Tailing` or `AwaitingFile` afterwards. `ShuttingDown` is terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RelayState {
    AwaitingFile,
    Tailing,
    Rotating,
    ShuttingDown,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RelaySettings {
    pub poll_interval: Duration,
    /// How often the open handle is checked against the path even when nothing new was read.
    pub rotation_check_interval: Duration,
    pub stats_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            rotation_check_interval: Duration::from_secs(1),
            stats_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// Polls a `FileTracker` at a fixed cadence and forwards every line it yields.
///
/// The loop is single threaded and owns the tracker. Waits go through `Sleeper`, so with `ShutdownSignal`
/// as the sleeper a signal interrupts both the poll interval and reopen backoff.
pub struct RelayLoop<S, M, Z> {
    tracker: FileTracker,
    sender: S,
    metrics: M,
    sleeper: Z,
    shutdown: ShutdownSignal,
    settings: RelaySettings,
    state: RelayState,
    last_rotation_check: Instant,
    last_report: Instant,
}

impl<S: Sender, M: MetricsSink, Z: Sleeper> RelayLoop<S, M, Z> {
    pub fn new(
        tracker: FileTracker,
        sender: S,
        metrics: M,
        sleeper: Z,
        shutdown: ShutdownSignal,
        settings: RelaySettings,
    ) -> Self {
        let state = if tracker.is_open() {
            RelayState::Tailing
        } else {
            RelayState::AwaitingFile
        };
        let now = Instant::now();
        Self {
            tracker,
            sender,
            metrics,
            sleeper,
            shutdown,
            settings,
            state,
            last_rotation_check: now,
            last_report: now,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn tracker(&self) -> &FileTracker {
        &self.tracker
    }

    pub fn sender(&self) -> &S {
        &self.sender
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    /// One poll: health check when due, read new lines, forward them, recover a lost file.
    ///
    /// Does not sleep for the poll interval; `run` does that between cycles. It may sleep inside reopen
    /// backoff when the file is missing.
    pub fn run_cycle(&mut self) -> RelayState {
        if self.state == RelayState::ShuttingDown {
            return self.state;
        }
        if self.shutdown.is_requested() {
            self.shut_down();
            return self.state;
        }

        let started = Instant::now();
        let checked = self.health_check();
        let outcome = match checked {
            Some(_) => PollOutcome::default(),
            None => self.tracker.poll(),
        };
        // a file showing up for the first time is not a rotation
        let rotation = checked
            .or(outcome.rotation)
            .filter(RotationReason::is_replacement);
        if let Some(reason) = &rotation {
            self.metrics.rotation_detected(reason);
        }
        self.forward(outcome.lines);

        let busy = started.elapsed();
        if busy > self.settings.poll_interval * 2 {
            warn!(
                took_ms = busy.as_millis() as u64,
                poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
                "poll cycle is falling behind"
            );
        }

        let next = if !self.tracker.is_open() {
            self.recover()
        } else if rotation.is_some() {
            RelayState::Rotating
        } else {
            RelayState::Tailing
        };
        self.transition(next);
        self.state
    }

    /// Cycle until shutdown, sleeping `poll_interval` between cycles and reporting stats periodically.
    pub fn run(&mut self) -> RelayState {
        info!(
            path = %self.tracker.path().display(),
            state = ?self.state,
            poll_interval_ms = self.settings.poll_interval.as_millis() as u64,
            "relay started"
        );
        while self.run_cycle() != RelayState::ShuttingDown {
            if self.last_report.elapsed() >= self.settings.stats_interval {
                self.metrics.report();
                self.last_report = Instant::now();
            }
            if !self.sleeper.sleep(self.settings.poll_interval) {
                self.shut_down();
            }
        }
        self.metrics.report();
        info!("relay stopped");
        self.state
    }

    fn health_check(&mut self) -> Option<RotationReason> {
        if !self.tracker.is_open()
            || self.last_rotation_check.elapsed() < self.settings.rotation_check_interval
        {
            return None;
        }
        self.last_rotation_check = Instant::now();
        self.tracker.check_rotation()
    }

    fn forward(&mut self, lines: Vec<Line>) {
        if lines.is_empty() {
            return;
        }
        self.metrics.lines_processed(lines.len() as u64);
        for line in lines {
            if line.truncated {
                self.metrics.line_truncated();
            }
            match self.sender.send(&line.bytes) {
                Ok(sent) => self.metrics.line_sent(sent as u64),
                Err(err) => {
                    self.metrics.send_failed();
                    let preview = &line.bytes[..line.bytes.len().min(100)];
                    warn!(
                        error = %err,
                        line = %String::from_utf8_lossy(preview),
                        "failed to send line"
                    );
                }
            }
        }
    }

    fn recover(&mut self) -> RelayState {
        if self.state == RelayState::Tailing {
            self.transition(RelayState::Rotating);
        }
        match self
            .tracker
            .reopen_with_retry(&self.settings.retry, &self.sleeper)
        {
            ReopenOutcome::Reopened { attempts } => {
                self.metrics.reopen_succeeded(attempts);
                RelayState::Tailing
            }
            ReopenOutcome::Exhausted { attempts } => {
                self.metrics.reopen_failed(attempts);
                RelayState::AwaitingFile
            }
            ReopenOutcome::Interrupted { .. } => {
                self.shut_down();
                RelayState::ShuttingDown
            }
        }
    }

    fn shut_down(&mut self) {
        if self.state != RelayState::ShuttingDown {
            self.tracker.close();
            self.transition(RelayState::ShuttingDown);
        }
    }

    fn transition(&mut self, next: RelayState) {
        if next != self.state {
            info!(from = ?self.state, to = ?next, "relay state changed");
            self.state = next;
        }
    }
}
