use std::{
    fmt,
    fs::File,
    io::{self, Read, Seek, SeekFrom},
    path::{Path, PathBuf},
    str::FromStr,
    time::SystemTime,
};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::{
    backoff::{RetryPolicy, Sleeper},
    identity::{stat_if_exists, FileIdentity, FileStat},
    lines::{split_complete_lines, Line},
};

const READ_CHUNK: usize = 64 * 1024;

/// Where reading starts when the file is first opened at startup. Any later reopen starts at 0.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartPosition {
    #[default]
    End,
    Beginning,
}

#[derive(Error, Debug)]
#[error("unknown start position `{0}`, expected `end` or `beginning`")]
pub struct ParseStartPositionError(String);

impl FromStr for StartPosition {
    type Err = ParseStartPositionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "end" => Ok(Self::End),
            "beginning" | "start" => Ok(Self::Beginning),
            _ => Err(ParseStartPositionError(s.to_string())),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrackerOptions {
    pub max_line_length: usize,
    pub start_at: StartPosition,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            max_line_length: 8192,
            start_at: StartPosition::End,
        }
    }
}

/// Why the tracker decided the file it was reading is no longer the one at its path.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RotationReason {
    /// Nothing exists at the path anymore.
    Vanished,
    /// A file appeared at the path while none was tracked.
    Created,
    /// The path now points to a different physical file.
    IdentityChanged {
        previous: FileIdentity,
        current: FileIdentity,
    },
    /// Same file, but it became smaller than what was already read.
    Truncated { offset: u64, size: u64 },
    /// Same file, but its modification time moved backwards.
    MtimeRegressed,
    /// The open handle refers to a file that has been unlinked.
    Unlinked,
    /// Stat or read failed unexpectedly.
    IoFailure,
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vanished => write!(f, "file vanished"),
            Self::Created => write!(f, "file created"),
            Self::IdentityChanged { previous, current } => {
                write!(f, "identity changed from {previous} to {current}")
            }
            Self::Truncated { offset, size } => {
                write!(f, "size {size} dropped below offset {offset}")
            }
            Self::MtimeRegressed => write!(f, "modification time moved backwards"),
            Self::Unlinked => write!(f, "open file was unlinked"),
            Self::IoFailure => write!(f, "i/o failure"),
        }
    }
}

impl RotationReason {
    /// Whether a file that was being read got replaced, as opposed to one showing up for the first time.
    pub fn is_replacement(&self) -> bool {
        !matches!(self, Self::Created)
    }
}

/// What a single `poll` produced.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub lines: Vec<Line>,
    pub rotation: Option<RotationReason>,
}

impl PollOutcome {
    fn rotated(reason: RotationReason) -> Self {
        Self {
            lines: vec![],
            rotation: Some(reason),
        }
    }

    pub fn is_rotation(&self) -> bool {
        self.rotation.is_some()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReopenOutcome {
    /// The file is open again. `attempts` is zero when it already was.
    Reopened { attempts: u32 },
    /// Every attempt failed; the tracker stays without a handle.
    Exhausted { attempts: u32 },
    /// Waiting was cut short by shutdown.
    Interrupted { attempts: u32 },
}

/// Snapshot of tracker bookkeeping, mostly useful for logs and tests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrackerState {
    pub open: bool,
    pub offset: u64,
    pub identity: Option<FileIdentity>,
    pub last_modified: Option<SystemTime>,
    pub last_known_size: u64,
}

struct OpenFile {
    file: File,
    identity: FileIdentity,
    last_modified: SystemTime,
}

/// Reads complete lines appended to a single file while surviving rotation of that file.
///
/// ## Usage
///
/// Create the tracker once with `FileTracker::open` and call `poll` on a timer. Each call returns the
/// complete lines written since the previous call, or a rotation reason when the file was replaced,
/// truncated or removed.
///
/// ```rust no_run
/// # use udp_log_relay::{FileTracker, TrackerOptions};
/// let mut tracker = FileTracker::open("/var/log/app.log", TrackerOptions::default());
/// loop {
///     let outcome = tracker.poll();
///     for line in outcome.lines {
///         println!("{}", String::from_utf8_lossy(&line.bytes));
///     }
///     std::thread::sleep(std::time::Duration::from_millis(100));
/// }
/// ```
///
/// ## Working principles
///
/// Identity of the tracked file (device and inode) is captured from the open handle. On every poll the
/// path is stat'ed again:
///
/// * a different identity replaces the handle and resets the offset to zero. The poll that notices it returns
/// no lines; the next one reads the new file from its start. A file appearing where none was tracked is
/// opened the same way and reported as `RotationReason::Created`.
/// * a size below what was already read, or a modification time older than the last one seen, is treated the
/// same way even though the identity did not change (truncation, copytruncate, fast recreate with inode reuse).
/// * otherwise new bytes are read in chunks of at most 64 KiB, and the offset moves past the last complete
/// line only. Bytes of a trailing line without terminator are kept in memory (at most `max_line_length + 1`
/// of them) and are not read again; the line is delivered once its terminator arrives.
///
/// I/O failures never escape: they drop the handle without reopening and are reported as a rotation, so the
/// caller can go through `reopen_with_retry` and its backoff. Failures while no handle is open are only logged.
///
/// ## Limitations
///
/// Lines appended to the old file between the last poll and its rotation are not delivered. Truncation that is
/// followed by enough writes to reach the previous offset before the next poll goes unnoticed unless the
/// modification time betrays it.
pub struct FileTracker {
    path: PathBuf,
    handle: Option<OpenFile>,
    offset: u64,
    last_known_size: u64,
    /// Read but undelivered bytes of an unterminated line, capped at `max_line_length + 1`
    partial: Vec<u8>,
    /// Bytes of that line dropped from `partial` because they exceed the cap
    partial_skipped: u64,
    options: TrackerOptions,
}

impl FileTracker {
    /// Creates a tracker and opens `path` if it exists. A missing or unreadable file is not an error:
    /// the tracker starts without a handle and picks the file up on a later poll.
    pub fn open(path: impl AsRef<Path>, options: TrackerOptions) -> Self {
        let mut tracker = Self {
            path: path.as_ref().to_path_buf(),
            handle: None,
            offset: 0,
            last_known_size: 0,
            partial: vec![],
            partial_skipped: 0,
            options,
        };
        match tracker.try_open(options.start_at) {
            Ok(true) => {}
            Ok(false) => warn!(path = %tracker.path.display(), "log file does not exist yet"),
            Err(err) => {
                warn!(path = %tracker.path.display(), error = %err, "failed to open log file")
            }
        }
        tracker
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        self.handle.as_ref().map(|open| open.identity)
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    /// Position up to which the file was read. Ahead of `offset` by the bytes of a pending partial line.
    pub fn read_position(&self) -> u64 {
        self.offset + self.partial_skipped + self.partial.len() as u64
    }

    pub fn state(&self) -> TrackerState {
        TrackerState {
            open: self.is_open(),
            offset: self.offset,
            identity: self.identity(),
            last_modified: self.handle.as_ref().map(|open| open.last_modified),
            last_known_size: self.last_known_size,
        }
    }

    /// Return complete lines appended since the previous call, or report a rotation.
    pub fn poll(&mut self) -> PollOutcome {
        let stat = match stat_if_exists(&self.path) {
            Ok(Some(stat)) => stat,
            Ok(None) if self.handle.is_some() => {
                return PollOutcome::rotated(self.rotate(RotationReason::Vanished))
            }
            Ok(None) => return PollOutcome::default(),
            Err(err) if self.handle.is_none() => {
                debug!(path = %self.path.display(), error = %err, "failed to stat missing log file");
                return PollOutcome::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to stat log file");
                return PollOutcome::rotated(self.fail(RotationReason::IoFailure));
            }
        };

        let position = self.read_position();
        let Some(current) = self.handle.as_mut() else {
            return match self.try_open(StartPosition::Beginning) {
                Ok(true) => PollOutcome::rotated(RotationReason::Created),
                Ok(false) => PollOutcome::default(),
                Err(err) => {
                    debug!(path = %self.path.display(), error = %err, "log file exists but cannot be opened");
                    PollOutcome::default()
                }
            };
        };

        if current.identity != stat.identity {
            let reason = RotationReason::IdentityChanged {
                previous: current.identity,
                current: stat.identity,
            };
            return PollOutcome::rotated(self.rotate(reason));
        }
        if stat.size < position {
            let reason = RotationReason::Truncated {
                offset: position,
                size: stat.size,
            };
            return PollOutcome::rotated(self.rotate(reason));
        }
        if stat.modified < current.last_modified {
            return PollOutcome::rotated(self.rotate(RotationReason::MtimeRegressed));
        }

        current.last_modified = stat.modified;
        self.last_known_size = stat.size;
        if stat.size == position {
            trace!(path = %self.path.display(), offset = self.offset, "no new data");
            return PollOutcome::default();
        }

        match self.read_until(stat.size) {
            Ok(lines) => PollOutcome {
                lines,
                rotation: None,
            },
            Err(err) => {
                warn!(
                    path = %self.path.display(),
                    offset = self.offset,
                    error = %err,
                    "failed to read log file"
                );
                PollOutcome::rotated(self.fail(RotationReason::IoFailure))
            }
        }
    }

    /// Check that the open handle still is the file at the configured path, independently of whether
    /// new bytes arrived. Rotation found here is handled the same way `poll` handles it.
    pub fn check_rotation(&mut self) -> Option<RotationReason> {
        let position = self.read_position();
        let open = self.handle.as_ref()?;
        let reason = match FileStat::of_file(&open.file) {
            Ok(held) if held.links == 0 => RotationReason::Unlinked,
            Ok(held) if held.size < position => RotationReason::Truncated {
                offset: position,
                size: held.size,
            },
            Ok(_) => match stat_if_exists(&self.path) {
                Ok(None) => RotationReason::Vanished,
                Ok(Some(stat)) if stat.identity != open.identity => {
                    RotationReason::IdentityChanged {
                        previous: open.identity,
                        current: stat.identity,
                    }
                }
                Ok(Some(_)) => return None,
                Err(err) => {
                    warn!(path = %self.path.display(), error = %err, "failed to stat log file");
                    return Some(self.fail(RotationReason::IoFailure));
                }
            },
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to stat open log file");
                return Some(self.fail(RotationReason::IoFailure));
            }
        };
        Some(self.rotate(reason))
    }

    /// Try to get a handle back, waiting according to `policy` before each attempt.
    ///
    /// Gives up after `policy.attempts` attempts; calling it again restarts the sequence from the first delay.
    pub fn reopen_with_retry(&mut self, policy: &RetryPolicy, sleeper: &impl Sleeper) -> ReopenOutcome {
        if self.is_open() {
            return ReopenOutcome::Reopened { attempts: 0 };
        }

        for attempt in 0..policy.attempts {
            let delay = policy.delay_before(attempt);
            if !sleeper.sleep(delay) {
                return ReopenOutcome::Interrupted { attempts: attempt };
            }
            let attempt = attempt + 1;
            match self.try_open(StartPosition::Beginning) {
                Ok(true) => {
                    info!(path = %self.path.display(), attempt, "reopened log file");
                    return ReopenOutcome::Reopened { attempts: attempt };
                }
                Ok(false) => warn!(
                    path = %self.path.display(),
                    attempt,
                    attempts = policy.attempts,
                    delay_ms = delay.as_millis() as u64,
                    "log file still missing"
                ),
                Err(err) => warn!(
                    path = %self.path.display(),
                    attempt,
                    attempts = policy.attempts,
                    error = %err,
                    "failed to reopen log file"
                ),
            }
        }

        error!(
            path = %self.path.display(),
            attempts = policy.attempts,
            "giving up on reopening log file until next poll"
        );
        ReopenOutcome::Exhausted {
            attempts: policy.attempts,
        }
    }

    /// Drop the handle and forget everything known about the file.
    pub fn close(&mut self) {
        if self.handle.take().is_some() {
            debug!(path = %self.path.display(), "closed log file");
        }
        self.offset = 0;
        self.last_known_size = 0;
        self.partial.clear();
        self.partial_skipped = 0;
    }

    /// Replace whatever is open with whatever is at the path now, starting at offset zero.
    fn rotate(&mut self, reason: RotationReason) -> RotationReason {
        info!(path = %self.path.display(), %reason, "rotation detected");
        self.close();
        if let Err(err) = self.try_open(StartPosition::Beginning) {
            warn!(path = %self.path.display(), error = %err, "failed to open rotated log file");
        }
        reason
    }

    /// Drop the handle without reopening; getting it back is left to `reopen_with_retry`.
    fn fail(&mut self, reason: RotationReason) -> RotationReason {
        warn!(path = %self.path.display(), %reason, "closing log file after failure");
        self.close();
        reason
    }

    /// Open the path, taking identity from the handle itself. Returns `false` if nothing exists there.
    fn try_open(&mut self, start_at: StartPosition) -> io::Result<bool> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "path is a directory",
            ));
        }
        let stat = FileStat::from_metadata(&metadata)?;
        self.partial.clear();
        self.partial_skipped = 0;
        self.offset = match start_at {
            StartPosition::End => stat.size,
            StartPosition::Beginning => 0,
        };
        self.last_known_size = stat.size;
        self.handle = Some(OpenFile {
            file,
            identity: stat.identity,
            last_modified: stat.modified,
        });
        info!(
            path = %self.path.display(),
            identity = %stat.identity,
            size = stat.size,
            offset = self.offset,
            "opened log file"
        );
        Ok(true)
    }

    /// Read from the current read position up to `size`, `READ_CHUNK` bytes at a time.
    fn read_until(&mut self, size: u64) -> io::Result<Vec<Line>> {
        let Some(open) = self.handle.as_mut() else {
            return Ok(vec![]);
        };
        let max_line_length = self.options.max_line_length;
        let mut position = self.offset + self.partial_skipped + self.partial.len() as u64;
        open.file.seek(SeekFrom::Start(position))?;

        let mut lines = vec![];
        let mut chunk = vec![0; READ_CHUNK];
        while position < size {
            let wanted = usize::try_from(size - position).map_or(READ_CHUNK, |left| left.min(READ_CHUNK));
            let read = open.file.read(&mut chunk[..wanted])?;
            if read == 0 {
                break;
            }
            position += read as u64;
            self.partial.extend_from_slice(&chunk[..read]);

            let split = split_complete_lines(&self.partial, max_line_length);
            if split.consumed > 0 {
                self.offset += self.partial_skipped + split.consumed as u64;
                self.partial_skipped = 0;
                self.partial.drain(..split.consumed);
                lines.extend(split.lines);
            }
            // one byte over the limit is enough to still mark the line as truncated
            let keep = max_line_length.saturating_add(1);
            if self.partial.len() > keep {
                self.partial_skipped += (self.partial.len() - keep) as u64;
                self.partial.truncate(keep);
            }
        }

        debug!(
            path = %self.path.display(),
            lines = lines.len(),
            offset = self.offset,
            pending = self.partial_skipped + self.partial.len() as u64,
            "read new lines"
        );
        Ok(lines)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        fs::{self, File, OpenOptions},
        io::Write,
        os::unix::fs::symlink,
        path::{Path, PathBuf},
        time::{Duration, SystemTime},
    };

    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::{
        FileTracker, PollOutcome, ReopenOutcome, RotationReason, StartPosition, TrackerOptions,
    };
    use crate::backoff::{RetryPolicy, Sleeper};

    struct LogDir {
        _dir: TempDir,
        path: PathBuf,
    }

    #[fixture]
    fn log() -> LogDir {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        LogDir { _dir: dir, path }
    }

    fn from_start() -> TrackerOptions {
        TrackerOptions {
            max_line_length: 1024,
            start_at: StartPosition::Beginning,
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

    fn texts(tracker: &mut FileTracker) -> Vec<String> {
        tracker
            .poll()
            .lines
            .into_iter()
            .map(|line| String::from_utf8(line.bytes).unwrap())
            .collect()
    }

    /// Records requested delays; `on_sleep` gets the number of sleeps so far.
    struct FakeSleeper<F: Fn(usize)> {
        delays: RefCell<Vec<Duration>>,
        on_sleep: F,
    }

    impl<F: Fn(usize)> FakeSleeper<F> {
        fn new(on_sleep: F) -> Self {
            Self {
                delays: RefCell::new(vec![]),
                on_sleep,
            }
        }
    }

    impl<F: Fn(usize)> Sleeper for FakeSleeper<F> {
        fn sleep(&self, duration: Duration) -> bool {
            self.delays.borrow_mut().push(duration);
            (self.on_sleep)(self.delays.borrow().len());
            true
        }
    }

    fn quick_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(10),
            multiplier: 2.0,
            max_delay: None,
        }
    }

    #[rstest]
    fn starts_at_end_of_existing_file(log: LogDir) {
        append(&log.path, "old\nlines\n");
        let mut tracker = FileTracker::open(&log.path, TrackerOptions::default());
        assert_eq!(tracker.offset(), 10);
        assert!(texts(&mut tracker).is_empty());

        append(&log.path, "new\n");
        assert_eq!(texts(&mut tracker), vec!["new"]);
    }

    #[rstest]
    fn starts_at_beginning_when_asked(log: LogDir) {
        append(&log.path, "old\n");
        let mut tracker = FileTracker::open(&log.path, from_start());
        assert_eq!(texts(&mut tracker), vec!["old"]);
    }

    #[rstest]
    fn offset_tracks_delivered_lines(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());
        let mut previous = tracker.offset();
        let mut delivered = 0;
        for chunk in ["a\n", "bb\ncc\n", "", "ddd\n"] {
            append(&log.path, chunk);
            let lines = tracker.poll().lines;
            delivered += lines.iter().map(|l| l.bytes.len() as u64 + 1).sum::<u64>();
            assert!(tracker.offset() >= previous);
            assert_eq!(tracker.offset(), delivered);
            previous = tracker.offset();
        }
        assert_eq!(tracker.offset(), 12);
    }

    #[rstest]
    fn partial_line_is_deferred_until_terminated(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());

        append(&log.path, "half");
        assert!(texts(&mut tracker).is_empty());
        assert_eq!(tracker.offset(), 0);

        append(&log.path, " done\n");
        assert_eq!(texts(&mut tracker), vec!["half done"]);
        assert!(texts(&mut tracker).is_empty());
        assert_eq!(tracker.offset(), 10);
    }

    #[rstest]
    fn truncation_reopens_at_zero(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());
        append(&log.path, "a\nb\n");
        assert_eq!(texts(&mut tracker), vec!["a", "b"]);
        assert_eq!(tracker.offset(), 4);

        File::create(&log.path).unwrap();
        append(&log.path, "c\n");

        let outcome = tracker.poll();
        assert!(outcome.lines.is_empty());
        assert_eq!(
            outcome.rotation,
            Some(RotationReason::Truncated { offset: 4, size: 2 })
        );
        assert_eq!(texts(&mut tracker), vec!["c"]);
        assert_eq!(tracker.offset(), 2);
        assert!(texts(&mut tracker).is_empty());
    }

    #[rstest]
    fn recreated_file_of_same_size_is_detected(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());
        append(&log.path, "old\n");
        assert_eq!(texts(&mut tracker), vec!["old"]);
        let before = tracker.identity().unwrap();

        fs::remove_file(&log.path).unwrap();
        append(&log.path, "new\n");

        let outcome = tracker.poll();
        assert!(matches!(
            outcome.rotation,
            Some(RotationReason::IdentityChanged { previous, .. }) if previous == before
        ));
        assert_ne!(tracker.identity(), Some(before));
        assert_eq!(texts(&mut tracker), vec!["new"]);
    }

    #[rstest]
    fn renamed_file_is_replaced_by_new_one(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());
        append(&log.path, "one\n");
        assert_eq!(texts(&mut tracker), vec!["one"]);

        fs::rename(&log.path, log.path.with_extension("log.1")).unwrap();
        append(&log.path, "two\nthree\n");

        assert!(tracker.poll().is_rotation());
        assert_eq!(texts(&mut tracker), vec!["two", "three"]);
    }

    #[rstest]
    fn vanished_file_is_reported_once(log: LogDir) {
        append(&log.path, "x\n");
        let mut tracker = FileTracker::open(&log.path, TrackerOptions::default());

        fs::remove_file(&log.path).unwrap();
        assert_eq!(tracker.poll().rotation, Some(RotationReason::Vanished));
        assert!(!tracker.is_open());
        assert_eq!(tracker.offset(), 0);

        assert_eq!(tracker.poll(), PollOutcome::default());
    }

    #[rstest]
    fn missing_file_is_picked_up_when_created(log: LogDir) {
        let mut tracker = FileTracker::open(&log.path, TrackerOptions::default());
        assert!(!tracker.is_open());
        assert_eq!(tracker.poll(), PollOutcome::default());

        append(&log.path, "hello\n");
        assert_eq!(tracker.poll().rotation, Some(RotationReason::Created));
        assert_eq!(texts(&mut tracker), vec!["hello"]);
    }

    #[rstest]
    fn backwards_mtime_forces_reopen(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());
        append(&log.path, "a\n");
        assert_eq!(texts(&mut tracker), vec!["a"]);

        let past = SystemTime::now() - Duration::from_secs(3600);
        File::options()
            .write(true)
            .open(&log.path)
            .unwrap()
            .set_modified(past)
            .unwrap();

        assert_eq!(tracker.poll().rotation, Some(RotationReason::MtimeRegressed));
        assert_eq!(tracker.offset(), 0);
        assert_eq!(texts(&mut tracker), vec!["a"]);
    }

    #[rstest]
    fn health_check_notices_unlinked_handle(log: LogDir) {
        append(&log.path, "a\n");
        let mut tracker = FileTracker::open(&log.path, TrackerOptions::default());
        assert_eq!(tracker.check_rotation(), None);

        fs::remove_file(&log.path).unwrap();
        assert_eq!(tracker.check_rotation(), Some(RotationReason::Unlinked));
        assert!(!tracker.is_open());
        assert_eq!(tracker.check_rotation(), None);
    }

    #[rstest]
    fn long_lines_are_truncated(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(
            &log.path,
            TrackerOptions {
                max_line_length: 3,
                start_at: StartPosition::Beginning,
            },
        );
        append(&log.path, "abcdef\n");
        let lines = tracker.poll().lines;
        assert_eq!(lines[0].bytes, b"abc");
        assert!(lines[0].truncated);
        assert_eq!(tracker.offset(), 7);
    }

    #[rstest]
    fn retry_gives_up_and_restarts_from_first_delay(log: LogDir) {
        let mut tracker = FileTracker::open(&log.path, TrackerOptions::default());
        let policy = quick_policy(3);
        let sleeper = FakeSleeper::new(|_| {});

        assert_eq!(
            tracker.reopen_with_retry(&policy, &sleeper),
            ReopenOutcome::Exhausted { attempts: 3 }
        );
        assert_eq!(
            tracker.reopen_with_retry(&policy, &sleeper),
            ReopenOutcome::Exhausted { attempts: 3 }
        );
        let delays: Vec<_> = sleeper.delays.borrow().iter().map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40, 10, 20, 40]);
    }

    #[rstest]
    fn retry_resumes_tailing_when_file_reappears(log: LogDir) {
        let mut tracker = FileTracker::open(&log.path, TrackerOptions::default());
        let path = log.path.clone();
        let sleeper = FakeSleeper::new(move |sleeps| {
            if sleeps == 2 {
                append(&path, "back\n");
            }
        });

        assert_eq!(
            tracker.reopen_with_retry(&quick_policy(5), &sleeper),
            ReopenOutcome::Reopened { attempts: 2 }
        );
        assert_eq!(tracker.offset(), 0);
        assert_eq!(texts(&mut tracker), vec!["back"]);
    }

    #[rstest]
    fn retry_stops_when_interrupted(log: LogDir) {
        struct Stopping;
        impl Sleeper for Stopping {
            fn sleep(&self, _: Duration) -> bool {
                false
            }
        }

        let mut tracker = FileTracker::open(&log.path, TrackerOptions::default());
        assert_eq!(
            tracker.reopen_with_retry(&quick_policy(5), &Stopping),
            ReopenOutcome::Interrupted { attempts: 0 }
        );
    }

    #[rstest]
    #[case("end", StartPosition::End)]
    #[case("Beginning", StartPosition::Beginning)]
    #[case("start", StartPosition::Beginning)]
    fn start_position_parses(#[case] raw: &str, #[case] expected: StartPosition) {
        assert_eq!(raw.parse::<StartPosition>().unwrap(), expected);
    }

    #[test]
    fn unknown_start_position_is_rejected() {
        assert!("middle".parse::<StartPosition>().is_err());
    }

    /// Make `path` a symlink to itself so every stat or open of it fails.
    fn loop_path(path: &Path) {
        let _ = fs::remove_file(path);
        symlink(path, path).unwrap();
    }

    #[rstest]
    fn unreadable_path_without_handle_is_not_a_rotation(log: LogDir) {
        loop_path(&log.path);
        let mut tracker = FileTracker::open(&log.path, TrackerOptions::default());
        assert!(!tracker.is_open());

        assert_eq!(tracker.poll(), PollOutcome::default());
        assert_eq!(tracker.poll(), PollOutcome::default());
        assert!(!tracker.is_open());
    }

    #[rstest]
    fn stat_failure_closes_handle_without_reopening(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());
        append(&log.path, "a\n");
        assert_eq!(texts(&mut tracker), vec!["a"]);

        loop_path(&log.path);
        assert_eq!(tracker.poll().rotation, Some(RotationReason::IoFailure));
        assert!(!tracker.is_open());
        assert_eq!(tracker.offset(), 0);
        assert_eq!(tracker.poll(), PollOutcome::default());

        let sleeper = FakeSleeper::new(|_| {});
        assert_eq!(
            tracker.reopen_with_retry(&quick_policy(3), &sleeper),
            ReopenOutcome::Exhausted { attempts: 3 }
        );
        let delays: Vec<_> = sleeper.delays.borrow().iter().map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40]);
    }

    #[rstest]
    fn health_check_stat_failure_closes_handle(log: LogDir) {
        append(&log.path, "a\n");
        let mut tracker = FileTracker::open(&log.path, TrackerOptions::default());

        loop_path(&log.path);
        assert_eq!(tracker.check_rotation(), Some(RotationReason::IoFailure));
        assert!(!tracker.is_open());
    }

    #[rstest]
    fn directory_at_path_is_never_opened(log: LogDir) {
        fs::create_dir(&log.path).unwrap();
        let mut tracker = FileTracker::open(&log.path, from_start());
        assert!(!tracker.is_open());
        assert_eq!(tracker.poll(), PollOutcome::default());
        assert_eq!(tracker.poll(), PollOutcome::default());

        let sleeper = FakeSleeper::new(|_| {});
        assert_eq!(
            tracker.reopen_with_retry(&quick_policy(2), &sleeper),
            ReopenOutcome::Exhausted { attempts: 2 }
        );
        assert_eq!(sleeper.delays.borrow().len(), 2);
    }

    #[rstest]
    fn health_check_notices_truncation_of_held_file(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());
        append(&log.path, "abc\n");
        assert_eq!(texts(&mut tracker), vec!["abc"]);
        let before = tracker.identity();

        File::create(&log.path).unwrap();
        assert_eq!(
            tracker.check_rotation(),
            Some(RotationReason::Truncated { offset: 4, size: 0 })
        );
        assert!(tracker.is_open());
        assert_eq!(tracker.identity(), before);
        assert_eq!(tracker.offset(), 0);

        append(&log.path, "d\n");
        assert_eq!(texts(&mut tracker), vec!["d"]);
    }

    #[rstest]
    fn lines_longer_than_a_read_chunk_are_cut_once(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());
        let long = "x".repeat(200_000);
        append(&log.path, &format!("{long}\ntail\n"));

        let lines = tracker.poll().lines;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].bytes.len(), 1024);
        assert!(lines[0].truncated);
        assert_eq!(lines[1].bytes, b"tail");
        assert_eq!(tracker.offset(), 200_006);
    }

    #[rstest]
    fn unterminated_tail_is_not_read_twice(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());

        append(&log.path, &"y".repeat(100_000));
        assert!(texts(&mut tracker).is_empty());
        assert_eq!(tracker.offset(), 0);
        assert_eq!(tracker.read_position(), 100_000);
        assert!(texts(&mut tracker).is_empty());

        append(&log.path, "\n");
        let lines = tracker.poll().lines;
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].bytes, "y".repeat(1024).as_bytes());
        assert!(lines[0].truncated);
        assert_eq!(tracker.offset(), 100_001);
        assert_eq!(tracker.read_position(), 100_001);
    }

    #[rstest]
    fn truncation_below_pending_partial_line_is_detected(log: LogDir) {
        append(&log.path, "");
        let mut tracker = FileTracker::open(&log.path, from_start());
        append(&log.path, "abcdef");
        assert!(texts(&mut tracker).is_empty());

        File::create(&log.path).unwrap();
        append(&log.path, "x\n");
        assert_eq!(
            tracker.poll().rotation,
            Some(RotationReason::Truncated { offset: 6, size: 2 })
        );
        assert_eq!(texts(&mut tracker), vec!["x"]);
    }

    #[test]
    fn only_created_is_not_a_replacement() {
        assert!(!RotationReason::Created.is_replacement());
        assert!(RotationReason::Vanished.is_replacement());
        assert!(RotationReason::IoFailure.is_replacement());
    }
}
