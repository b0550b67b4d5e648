use std::{
    fs::{self, OpenOptions},
    io::Write,
    net::UdpSocket,
    path::Path,
    sync::Arc,
    time::Duration,
};

use rstest::{fixture, rstest};
use tempfile::TempDir;
use udp_log_relay::{
    FileTracker, RelayLoop, RelaySettings, RelayState, RelayStats, RetryPolicy, ShutdownSignal,
    StartPosition, TrackerOptions, UdpSender,
};

struct Harness {
    dir: TempDir,
    listener: UdpSocket,
}

impl Harness {
    fn log(&self) -> std::path::PathBuf {
        self.dir.path().join("app.log")
    }

    fn recv(&self) -> String {
        let mut buf = [0u8; 2048];
        let (len, _) = self.listener.recv_from(&mut buf).unwrap();
        String::from_utf8_lossy(&buf[..len]).into_owned()
    }
}

#[fixture]
fn harness() -> Harness {
    let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
    listener
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    Harness {
        dir: tempfile::tempdir().unwrap(),
        listener,
    }
}

fn append(path: &Path, content: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(content.as_bytes()).unwrap();
}

fn relay(harness: &Harness) -> RelayLoop<UdpSender, Arc<RelayStats>, ShutdownSignal> {
    let sender = UdpSender::new(
        harness.listener.local_addr().unwrap(),
        Duration::from_secs(1),
    )
    .unwrap();
    let tracker = FileTracker::open(
        harness.log(),
        TrackerOptions {
            max_line_length: 16,
            start_at: StartPosition::Beginning,
        },
    );
    let shutdown = ShutdownSignal::new();
    RelayLoop::new(
        tracker,
        sender,
        Arc::new(RelayStats::new()),
        shutdown.clone(),
        shutdown,
        RelaySettings {
            poll_interval: Duration::from_millis(10),
            rotation_check_interval: Duration::from_secs(3600),
            stats_interval: Duration::from_secs(3600),
            retry: RetryPolicy {
                attempts: 2,
                initial_delay: Duration::from_millis(5),
                multiplier: 2.0,
                max_delay: None,
            },
        },
    )
}

#[rstest]
fn lines_arrive_as_datagrams(harness: Harness) {
    append(&harness.log(), "first\nsecond\npartial");
    let mut relay = relay(&harness);

    assert_eq!(relay.run_cycle(), RelayState::Tailing);
    assert_eq!(harness.recv(), "first");
    assert_eq!(harness.recv(), "second");

    append(&harness.log(), " line\n");
    relay.run_cycle();
    assert_eq!(harness.recv(), "partial line");

    let stats = relay.metrics().snapshot();
    assert_eq!(stats.lines_sent, 3);
    assert_eq!(stats.bytes_sent, 23);
}

#[rstest]
fn long_lines_are_cut(harness: Harness) {
    append(&harness.log(), "0123456789abcdefXYZ\n");
    let mut relay = relay(&harness);

    relay.run_cycle();
    assert_eq!(harness.recv(), "0123456789abcdef");
    assert_eq!(relay.metrics().snapshot().lines_truncated, 1);
}

#[rstest]
fn rename_rotation_continues_with_new_file(harness: Harness) {
    append(&harness.log(), "before\n");
    let mut relay = relay(&harness);
    relay.run_cycle();
    assert_eq!(harness.recv(), "before");

    fs::rename(harness.log(), harness.dir.path().join("app.log.1")).unwrap();
    append(&harness.log(), "after\n");

    assert_eq!(relay.run_cycle(), RelayState::Rotating);
    assert_eq!(relay.tracker().offset(), 0);
    assert_eq!(relay.run_cycle(), RelayState::Tailing);
    assert_eq!(harness.recv(), "after");
    assert_eq!(relay.metrics().snapshot().rotations, 1);
}

#[rstest]
fn shutdown_stops_the_loop(harness: Harness) {
    append(&harness.log(), "line\n");
    let shutdown = ShutdownSignal::new();
    shutdown.trigger();
    let sender = UdpSender::new(
        harness.listener.local_addr().unwrap(),
        Duration::from_secs(1),
    )
    .unwrap();
    let mut relay = RelayLoop::new(
        FileTracker::open(harness.log(), TrackerOptions::default()),
        sender,
        RelayStats::new(),
        shutdown.clone(),
        shutdown,
        RelaySettings::default(),
    );

    assert_eq!(relay.run(), RelayState::ShuttingDown);
    assert!(!relay.tracker().is_open());
}
