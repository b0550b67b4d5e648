/// One complete line ready to be forwarded, without its terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Line {
    pub bytes: Vec<u8>,
    /// Set when the line was longer than the configured maximum and got cut.
    pub truncated: bool,
}

impl Line {
    fn capped(raw: &[u8], max_len: usize) -> Self {
        if raw.len() > max_len {
            Self {
                bytes: raw[..max_len].to_vec(),
                truncated: true,
            }
        } else {
            Self {
                bytes: raw.to_vec(),
                truncated: false,
            }
        }
    }
}

/// Result of splitting a chunk of file content into lines.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SplitLines {
    pub lines: Vec<Line>,
    /// Bytes covered by complete lines, terminators included. A trailing partial line is not counted.
    pub consumed: usize,
}

/// Split `buf` on `\n`, keeping only lines whose terminator is present.
///
/// `\r\n` terminators are stripped as well. Blank lines are consumed but not returned. Lines longer
/// than `max_len` are cut to `max_len` bytes and flagged.
///
/// ```rust
/// # use udp_log_relay::split_complete_lines;
/// let split = split_complete_lines(b"first\r\nsecond\nthi", 1024);
/// assert_eq!(split.consumed, 14);
/// assert_eq!(split.lines.len(), 2);
/// assert_eq!(split.lines[1].bytes, b"second");
/// ```
pub fn split_complete_lines(buf: &[u8], max_len: usize) -> SplitLines {
    let Some(last_terminator) = buf.iter().rposition(|&b| b == b'\n') else {
        return SplitLines::default();
    };

    let lines = buf[..last_terminator]
        .split(|&b| b == b'\n')
        .map(strip_carriage_return)
        .filter(|raw| !raw.is_empty())
        .map(|raw| Line::capped(raw, max_len))
        .collect();

    SplitLines {
        lines,
        consumed: last_terminator + 1,
    }
}

fn strip_carriage_return(raw: &[u8]) -> &[u8] {
    raw.strip_suffix(b"\r").unwrap_or(raw)
}
