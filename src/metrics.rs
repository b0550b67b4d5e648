// Counters are observational only: nothing here feeds back into tailing decisions.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use tracing::info;

use crate::tracker::RotationReason;

/// Receives counter increments and notable events from the relay loop.
pub trait MetricsSink {
    fn lines_processed(&self, count: u64);
    fn line_sent(&self, bytes: u64);
    fn send_failed(&self);
    fn line_truncated(&self);
    fn rotation_detected(&self, reason: &RotationReason);
    fn reopen_succeeded(&self, _attempts: u32) {}
    fn reopen_failed(&self, _attempts: u32) {}
    /// Emit a summary. Called periodically and once on shutdown.
    fn report(&self) {}
}

impl<M: MetricsSink + ?Sized> MetricsSink for Arc<M> {
    fn lines_processed(&self, count: u64) {
        (**self).lines_processed(count)
    }
    fn line_sent(&self, bytes: u64) {
        (**self).line_sent(bytes)
    }
    fn send_failed(&self) {
        (**self).send_failed()
    }
    fn line_truncated(&self) {
        (**self).line_truncated()
    }
    fn rotation_detected(&self, reason: &RotationReason) {
        (**self).rotation_detected(reason)
    }
    fn reopen_succeeded(&self, attempts: u32) {
        (**self).reopen_succeeded(attempts)
    }
    fn reopen_failed(&self, attempts: u32) {
        (**self).reopen_failed(attempts)
    }
    fn report(&self) {
        (**self).report()
    }
}

/// Lock-free relay counters
#[derive(Debug)]
pub struct RelayStats {
    started: Instant,
    lines_processed: AtomicU64,
    lines_sent: AtomicU64,
    lines_failed: AtomicU64,
    lines_truncated: AtomicU64,
    bytes_sent: AtomicU64,
    rotations: AtomicU64,
    failed_reopens: AtomicU64,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StatsSnapshot {
    pub uptime: Duration,
    pub lines_processed: u64,
    pub lines_sent: u64,
    pub lines_failed: u64,
    pub lines_truncated: u64,
    pub bytes_sent: u64,
    pub rotations: u64,
    pub failed_reopens: u64,
}

impl StatsSnapshot {
    pub fn lines_per_second(&self) -> f64 {
        per_second(self.lines_sent, self.uptime)
    }

    pub fn bytes_per_second(&self) -> f64 {
        per_second(self.bytes_sent, self.uptime)
    }
}

fn per_second(count: u64, over: Duration) -> f64 {
    let seconds = over.as_secs_f64();
    if seconds > 0.0 {
        count as f64 / seconds
    } else {
        0.0
    }
}

impl Default for RelayStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            lines_processed: AtomicU64::new(0),
            lines_sent: AtomicU64::new(0),
            lines_failed: AtomicU64::new(0),
            lines_truncated: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            rotations: AtomicU64::new(0),
            failed_reopens: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime: self.started.elapsed(),
            lines_processed: self.lines_processed.load(Ordering::Relaxed),
            lines_sent: self.lines_sent.load(Ordering::Relaxed),
            lines_failed: self.lines_failed.load(Ordering::Relaxed),
            lines_truncated: self.lines_truncated.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            rotations: self.rotations.load(Ordering::Relaxed),
            failed_reopens: self.failed_reopens.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for RelayStats {
    fn lines_processed(&self, count: u64) {
        self.lines_processed.fetch_add(count, Ordering::Relaxed);
    }

    fn line_sent(&self, bytes: u64) {
        self.lines_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    fn send_failed(&self) {
        self.lines_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn line_truncated(&self) {
        self.lines_truncated.fetch_add(1, Ordering::Relaxed);
    }

    fn rotation_detected(&self, _reason: &RotationReason) {
        self.rotations.fetch_add(1, Ordering::Relaxed);
    }

    fn reopen_failed(&self, _attempts: u32) {
        self.failed_reopens.fetch_add(1, Ordering::Relaxed);
    }

    fn report(&self) {
        let snapshot = self.snapshot();
        info!(
            uptime_secs = snapshot.uptime.as_secs(),
            lines_processed = snapshot.lines_processed,
            lines_sent = snapshot.lines_sent,
            lines_failed = snapshot.lines_failed,
            lines_truncated = snapshot.lines_truncated,
            bytes_sent = snapshot.bytes_sent,
            rotations = snapshot.rotations,
            failed_reopens = snapshot.failed_reopens,
            lines_per_sec = snapshot.lines_per_second(),
            bytes_per_sec = snapshot.bytes_per_second(),
            "relay statistics"
        );
    }
}
