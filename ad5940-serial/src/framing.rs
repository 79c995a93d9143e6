//! Extraction of single brace-delimited messages from the byte stream.
//!
//! The bridge does not packetise or terminate its replies; a reply is simply
//! one JSON object written to the UART, possibly after stray bytes left over
//! from a reset or an earlier, abandoned exchange. The framer discards
//! everything before the first `{`, then captures bytes until the braces
//! balance again.

use std::io::{self, Read};
use std::time::{Duration, Instant};

use crate::error::FramingError;
use crate::Error;

/// Frame capacity for ordinary replies.
pub const FRAME_CAPACITY: usize = 8 * 1024;

/// Frame capacity for FIFO reads, whose replies carry a whole array.
pub const FIFO_FRAME_CAPACITY: usize = 64 * 1024;

/// Brace-depth tracker over a stream of bytes.
///
/// Braces inside JSON strings are ignored so that remote error text cannot
/// end a frame early.
#[derive(Debug, Default)]
struct Scanner {
    depth: usize,
    capturing: bool,
    in_string: bool,
    escaped: bool,
}

impl Scanner {
    /// Feed one byte. Returns whether the byte belongs to the message, and
    /// whether the message is now complete.
    fn feed(&mut self, byte: u8) -> (bool, bool) {
        if !self.capturing {
            if byte != b'{' {
                return (false, false);
            }
            self.capturing = true;
        }

        if self.in_string {
            match byte {
                _ if self.escaped => self.escaped = false,
                b'\\' => self.escaped = true,
                b'"' => self.in_string = false,
                _ => {}
            }
            return (true, false);
        }

        match byte {
            b'"' => self.in_string = true,
            b'{' => self.depth += 1,
            b'}' => self.depth -= 1,
            _ => {}
        }
        (true, self.depth == 0)
    }
}

/// Read exactly one complete message from `reader`.
///
/// Every individual read may wait up to `deadline` (the caller configures the
/// transport's read timeout), and the whole extraction is abandoned once
/// `deadline` has elapsed since the call began, so a trickle of noise bytes
/// cannot keep the caller waiting indefinitely.
///
/// # Errors
///
/// - [`FramingError::Timeout`] if no complete message arrived in time.
/// - [`FramingError::EndOfStream`] if the stream closed first.
/// - [`FramingError::Overflow`] if the message would exceed `capacity` bytes.
/// - [`Error::Transport`] if the underlying read failed.
pub fn read_frame<R: Read + ?Sized>(
    reader: &mut R,
    capacity: usize,
    deadline: Duration,
) -> Result<Vec<u8>, Error> {
    let start = Instant::now();
    let mut scanner = Scanner::default();
    let mut frame = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        match reader.read(&mut byte) {
            Ok(0) => {
                return Err(FramingError::EndOfStream {
                    captured: frame.len(),
                }
                .into());
            }
            Ok(_) => {
                let (keep, complete) = scanner.feed(byte[0]);
                if keep {
                    if frame.len() == capacity {
                        return Err(FramingError::Overflow { capacity }.into());
                    }
                    frame.push(byte[0]);
                }
                if complete {
                    return Ok(frame);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                ) =>
            {
                return Err(FramingError::Timeout {
                    deadline,
                    captured: frame.len(),
                }
                .into());
            }
            Err(e) => return Err(Error::Transport(e)),
        }

        if start.elapsed() > deadline {
            return Err(FramingError::Timeout {
                deadline,
                captured: frame.len(),
            }
            .into());
        }
    }
}
