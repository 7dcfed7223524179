//! Wire protocol for relaying file changes.
//!
//! A connection opens with a single text handshake line declaring the project,
//! followed by zero or more length-prefixed frames:
//!
//! ```text
//! INIT <name> <kind> \n
//! <pathLen>\n<pathBytes><contentLen>\n<contentBytes>
//! ```
//!
//! There is no end-of-session frame. The stream closing at a frame boundary is
//! the only terminator; anything else is a framing error for that connection.

pub mod frame;
pub mod handshake;

pub use frame::{ChangeUnit, encode_frame, read_frame, write_frame};
pub use handshake::{HANDSHAKE_TAG, MAX_HANDSHAKE_LEN, read_handshake, write_handshake};

use std::fmt::{self, Display, Formatter};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Default upper bound on a frame's declared path length.
pub const DEFAULT_MAX_PATH_LEN: usize = 4096;

/// Default upper bound on a frame's declared content length (50MB).
pub const DEFAULT_MAX_CONTENT_LEN: usize = 50 * 1024 * 1024;

/// Longest accepted length line, surrounding whitespace included.
const MAX_LENGTH_LINE: usize = 64;

/// `u64::MAX` has 20 decimal digits.
const MAX_LENGTH_DIGITS: usize = 20;

/// Errors that end a connection. None of them are retried.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Malformed handshake: {0}")]
    MalformedHandshake(String),

    #[error("Bad length prefix: {0:?}")]
    BadLengthPrefix(String),

    #[error("Stream ended in the middle of a frame")]
    TruncatedStream,

    #[error("Declared {field} length {declared} exceeds limit of {limit} bytes")]
    FrameTooLarge {
        field: FrameField,
        declared: u64,
        limit: usize,
    },

    #[error("Frame path is not valid UTF-8")]
    NonUtf8Path,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Map a read error, treating an early EOF as truncation.
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::TruncatedStream
        } else {
            Self::Io(err)
        }
    }
}

/// Which length-prefixed field of a frame an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    Path,
    Content,
}

impl Display for FrameField {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path => f.write_str("path"),
            Self::Content => f.write_str("content"),
        }
    }
}

/// Bounds applied to peer-declared lengths before anything is allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLimits {
    pub max_path_len: usize,
    pub max_content_len: usize,
}

impl FrameLimits {
    pub(crate) fn check(&self, field: FrameField, declared: u64) -> Result<usize, ProtocolError> {
        let limit = match field {
            FrameField::Path => self.max_path_len,
            FrameField::Content => self.max_content_len,
        };
        match usize::try_from(declared) {
            Ok(len) if len <= limit => Ok(len),
            _ => Err(ProtocolError::FrameTooLarge {
                field,
                declared,
                limit,
            }),
        }
    }
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_path_len: DEFAULT_MAX_PATH_LEN,
            max_content_len: DEFAULT_MAX_CONTENT_LEN,
        }
    }
}

/// Failure modes of [`read_line_bounded`].
#[derive(Debug)]
pub(crate) enum LineError {
    /// No `\n` within the allowed number of bytes.
    TooLong,
    /// EOF after at least one byte of the line.
    Truncated,
    Io(io::Error),
}

/// Read up to and including the next `\n`, returning the line without it.
///
/// Returns `Ok(None)` when the stream is already at EOF, which callers use to
/// tell a clean close apart from a truncated line.
pub(crate) async fn read_line_bounded<R>(
    reader: &mut R,
    limit: usize,
) -> Result<Option<Vec<u8>>, LineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let available = reader.fill_buf().await.map_err(LineError::Io)?;
        if available.is_empty() {
            return if line.is_empty() {
                Ok(None)
            } else {
                Err(LineError::Truncated)
            };
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if line.len() + pos > limit {
                    return Err(LineError::TooLong);
                }
                line.extend_from_slice(&available[..pos]);
                reader.consume(pos + 1);
                return Ok(Some(line));
            }
            None => {
                let len = available.len();
                if line.len() + len > limit {
                    return Err(LineError::TooLong);
                }
                line.extend_from_slice(available);
                reader.consume(len);
            }
        }
    }
}

/// Read one length line. `Ok(None)` means clean EOF before the first byte.
pub(crate) async fn read_length<R>(reader: &mut R) -> Result<Option<u64>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    match read_line_bounded(reader, MAX_LENGTH_LINE).await {
        Ok(Some(line)) => parse_length(&line).map(Some),
        Ok(None) => Ok(None),
        Err(LineError::Truncated) => Err(ProtocolError::TruncatedStream),
        Err(LineError::TooLong) => Err(ProtocolError::BadLengthPrefix(format!(
            "length line longer than {} bytes",
            MAX_LENGTH_LINE
        ))),
        Err(LineError::Io(e)) => Err(ProtocolError::from_read(e)),
    }
}

/// Parse a non-negative decimal length, ignoring surrounding whitespace.
pub(crate) fn parse_length(line: &[u8]) -> Result<u64, ProtocolError> {
    let bad = || ProtocolError::BadLengthPrefix(String::from_utf8_lossy(line).trim().to_string());

    let text = std::str::from_utf8(line).map_err(|_| bad())?.trim();
    let digits = text.strip_prefix('+').unwrap_or(text);
    if digits.is_empty()
        || digits.len() > MAX_LENGTH_DIGITS
        || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(bad());
    }

    digits.parse::<u64>().map_err(|_| bad())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_length_accepts_decimal() {
        assert_eq!(parse_length(b"0").unwrap(), 0);
        assert_eq!(parse_length(b"12").unwrap(), 12);
        assert_eq!(parse_length(b"007").unwrap(), 7);
        assert_eq!(parse_length(b"+5").unwrap(), 5);
    }

    #[test]
    fn test_parse_length_trims_whitespace() {
        assert_eq!(parse_length(b" 42\r").unwrap(), 42);
    }

    #[test]
    fn test_parse_length_rejects_garbage() {
        for input in [&b"abc"[..], b"-1", b"", b"+", b"1 2", b"0x10", b"\xff"] {
            assert!(
                matches!(parse_length(input), Err(ProtocolError::BadLengthPrefix(_))),
                "expected BadLengthPrefix for {:?}",
                input
            );
        }
    }

    #[test]
    fn test_parse_length_rejects_overflow() {
        assert!(matches!(
            parse_length(b"99999999999999999999"),
            Err(ProtocolError::BadLengthPrefix(_))
        ));
        assert!(matches!(
            parse_length(b"123456789012345678901"),
            Err(ProtocolError::BadLengthPrefix(_))
        ));
    }

    #[test]
    fn test_limits_check() {
        let limits = FrameLimits {
            max_path_len: 8,
            max_content_len: 16,
        };
        assert_eq!(limits.check(FrameField::Path, 8).unwrap(), 8);
        assert!(matches!(
            limits.check(FrameField::Path, 9),
            Err(ProtocolError::FrameTooLarge {
                field: FrameField::Path,
                declared: 9,
                limit: 8
            })
        ));
        assert_eq!(limits.check(FrameField::Content, 16).unwrap(), 16);
    }

    #[tokio::test]
    async fn test_read_line_bounded() {
        let mut input: &[u8] = b"first\nsecond";
        let line = read_line_bounded(&mut input, 16).await.unwrap();
        assert_eq!(line.as_deref(), Some(&b"first"[..]));

        // Unterminated trailing bytes are a truncated line, not a clean EOF
        assert!(matches!(
            read_line_bounded(&mut input, 16).await,
            Err(LineError::Truncated)
        ));
    }

    #[tokio::test]
    async fn test_read_line_bounded_clean_eof() {
        let mut input: &[u8] = b"";
        assert!(read_line_bounded(&mut input, 16).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_line_bounded_too_long() {
        let mut input: &[u8] = b"0123456789\n";
        assert!(matches!(
            read_line_bounded(&mut input, 4).await,
            Err(LineError::TooLong)
        ));
    }
}
