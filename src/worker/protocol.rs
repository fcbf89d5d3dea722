//! Result record exchanged between a worker and the manager.
//!
//! A worker writes exactly one line of the form
//! `Process <pid> finishes. Symbol <char>. Instances <count>.` followed by
//! `\n`. External consumers parse the aggregated report, so the layout is
//! fixed byte for byte.

use crate::error::{Result, SymCountError};

/// Upper bound for a single drain of a worker channel.
pub const MAX_MESSAGE_SIZE: usize = 512;

const PREFIX: &[u8] = b"Process ";
const SYMBOL_MARKER: &[u8] = b" finishes. Symbol ";
const COUNT_MARKER: &[u8] = b". Instances ";

/// Final report of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultMessage {
    /// Process ID of the reporting worker.
    pub pid: u32,
    /// The byte that was counted.
    pub symbol: u8,
    /// Number of occurrences found.
    pub count: u64,
}

impl ResultMessage {
    pub fn new(pid: u32, symbol: u8, count: u64) -> Self {
        Self { pid, symbol, count }
    }

    /// Encode as a newline-terminated record.
    ///
    /// The symbol is emitted as the raw byte, so this returns bytes rather
    /// than a `String`.
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = Vec::with_capacity(64);
        line.extend_from_slice(PREFIX);
        line.extend_from_slice(self.pid.to_string().as_bytes());
        line.extend_from_slice(SYMBOL_MARKER);
        line.push(self.symbol);
        line.extend_from_slice(COUNT_MARKER);
        line.extend_from_slice(self.count.to_string().as_bytes());
        line.extend_from_slice(b".\n");
        line
    }

    /// Decode a record, tolerating a missing or CRLF terminator.
    pub fn from_line(line: &[u8]) -> Result<Self> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);

        let rest = line
            .strip_prefix(PREFIX)
            .ok_or_else(|| malformed("missing 'Process' prefix"))?;
        let split = find(rest, SYMBOL_MARKER).ok_or_else(|| malformed("missing symbol marker"))?;
        let pid = parse_decimal(&rest[..split]).ok_or_else(|| malformed("invalid pid"))?;

        let (&symbol, rest) = rest[split + SYMBOL_MARKER.len()..]
            .split_first()
            .ok_or_else(|| malformed("missing symbol"))?;
        let rest = rest
            .strip_prefix(COUNT_MARKER)
            .ok_or_else(|| malformed("missing instances marker"))?;
        let digits = rest
            .strip_suffix(b".")
            .ok_or_else(|| malformed("missing final period"))?;
        let count = parse_decimal(digits).ok_or_else(|| malformed("invalid count"))?;

        Ok(Self { pid, symbol, count })
    }
}

impl std::fmt::Display for ResultMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Process {} finishes. Symbol {}. Instances {}.",
            self.pid,
            self.symbol.escape_ascii(),
            self.count
        )
    }
}

fn malformed(reason: &str) -> SymCountError {
    SymCountError::Protocol(reason.to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_decimal<T: std::str::FromStr>(digits: &[u8]) -> Option<T> {
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(digits).ok()?.parse().ok()
}
