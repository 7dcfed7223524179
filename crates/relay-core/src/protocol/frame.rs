//! Length-prefixed frames carrying one changed file each.
//!
//! Decoding trusts the declared byte counts and never looks for boundaries in
//! the payload, so a peer that lies about a length desynchronizes the rest of
//! the stream. Every decode error is therefore terminal for the connection.

use super::{FrameField, FrameLimits, ProtocolError, read_length};
use std::io;
use tokio::io::{AsyncBufRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Initial buffer size for payload reads; buffers grow as bytes actually arrive.
const READ_CHUNK: usize = 64 * 1024;

/// The full current contents of one file, addressed relative to the watch root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeUnit {
    /// `/`-separated path relative to the sender's watch root
    pub relative_path: String,
    /// Whole file contents at event time (not a diff)
    pub content: Vec<u8>,
}

impl ChangeUnit {
    pub fn new(relative_path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            relative_path: relative_path.into(),
            content: content.into(),
        }
    }
}

/// The two length lines plus path bytes; content follows directly.
fn frame_header(unit: &ChangeUnit) -> Vec<u8> {
    let path = unit.relative_path.as_bytes();
    let mut header = Vec::with_capacity(path.len() + 2 * (super::MAX_LENGTH_DIGITS + 1));
    header.extend_from_slice(format!("{}\n", path.len()).as_bytes());
    header.extend_from_slice(path);
    header.extend_from_slice(format!("{}\n", unit.content.len()).as_bytes());
    header
}

/// Encode a unit into a single contiguous frame.
pub fn encode_frame(unit: &ChangeUnit) -> Vec<u8> {
    let mut frame = frame_header(unit);
    frame.extend_from_slice(&unit.content);
    frame
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, unit: &ChangeUnit) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame_header(unit)).await?;
    writer.write_all(&unit.content).await?;
    writer.flush().await
}

/// Read the next frame.
///
/// Returns `Ok(None)` if the stream closed cleanly on a frame boundary.
pub async fn read_frame<R>(
    reader: &mut R,
    limits: &FrameLimits,
) -> Result<Option<ChangeUnit>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let Some(path_len) = read_length(reader).await? else {
        return Ok(None);
    };
    let path_len = limits.check(FrameField::Path, path_len)?;
    let path = read_payload(reader, path_len).await?;
    let relative_path = String::from_utf8(path).map_err(|_| ProtocolError::NonUtf8Path)?;

    let content_len = read_length(reader)
        .await?
        .ok_or(ProtocolError::TruncatedStream)?;
    let content_len = limits.check(FrameField::Content, content_len)?;
    let content = read_payload(reader, content_len).await?;

    Ok(Some(ChangeUnit {
        relative_path,
        content,
    }))
}

/// Read exactly `len` bytes or fail with `TruncatedStream`.
async fn read_payload<R>(reader: &mut R, len: usize) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(len.min(READ_CHUNK));
    (&mut *reader)
        .take(len as u64)
        .read_to_end(&mut buf)
        .await
        .map_err(ProtocolError::from_read)?;

    if buf.len() != len {
        return Err(ProtocolError::TruncatedStream);
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(bytes: &[u8]) -> Result<Option<ChangeUnit>, ProtocolError> {
        let mut reader = bytes;
        read_frame(&mut reader, &FrameLimits::default()).await
    }

    #[test]
    fn test_encode_layout() {
        let unit = ChangeUnit::new("src/main.go", "package main");
        assert_eq!(encode_frame(&unit), b"11\nsrc/main.go12\npackage main");
    }

    #[tokio::test]
    async fn test_roundtrip_preserves_awkward_content() {
        let cases = [
            ChangeUnit::new("empty.txt", Vec::<u8>::new()),
            ChangeUnit::new("lines.txt", "one\ntwo\n\n12\nthree"),
            ChangeUnit::new("deep/nested/bin.dat", vec![0u8, 255, b'\n', 10, 13, 0]),
            ChangeUnit::new("unicodé/файл.md", "# héllo"),
        ];

        for unit in cases {
            let decoded = decode(&encode_frame(&unit)).await.unwrap();
            assert_eq!(decoded, Some(unit));
        }
    }

    #[tokio::test]
    async fn test_write_frame_matches_encode() {
        let unit = ChangeUnit::new("a/b.txt", "hello\nworld");
        let mut out = Vec::new();
        write_frame(&mut out, &unit).await.unwrap();
        assert_eq!(out, encode_frame(&unit));
    }

    #[tokio::test]
    async fn test_consecutive_frames() {
        let first = ChangeUnit::new("one.txt", "1");
        let second = ChangeUnit::new("two.txt", "22");
        let mut stream = encode_frame(&first);
        stream.extend_from_slice(&encode_frame(&second));

        let mut reader = stream.as_slice();
        let limits = FrameLimits::default();
        assert_eq!(read_frame(&mut reader, &limits).await.unwrap(), Some(first));
        assert_eq!(read_frame(&mut reader, &limits).await.unwrap(), Some(second));
        assert_eq!(read_frame(&mut reader, &limits).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clean_close_is_none() {
        assert_eq!(decode(b"").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_content_shorter_than_declared_is_truncated() {
        let err = decode(b"5\nhello100\nonly a few bytes").await.unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedStream));
    }

    #[tokio::test]
    async fn test_path_shorter_than_declared_is_truncated() {
        let err = decode(b"10\nabc").await.unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedStream));
    }

    #[tokio::test]
    async fn test_missing_content_length_is_truncated() {
        let err = decode(b"3\nabc").await.unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedStream));

        let err = decode(b"3\nabc4").await.unwrap_err();
        assert!(matches!(err, ProtocolError::TruncatedStream));
    }

    #[tokio::test]
    async fn test_non_numeric_length() {
        let err = decode(b"abc\nwhatever").await.unwrap_err();
        assert!(matches!(err, ProtocolError::BadLengthPrefix(ref s) if s == "abc"));
    }

    #[tokio::test]
    async fn test_negative_length() {
        let err = decode(b"3\nabc-1\n").await.unwrap_err();
        assert!(matches!(err, ProtocolError::BadLengthPrefix(_)));
    }

    #[tokio::test]
    async fn test_oversized_length_rejected_before_reading() {
        let limits = FrameLimits {
            max_path_len: 16,
            max_content_len: 4,
        };
        let mut reader: &[u8] = b"3\nabc5\nhello";
        let err = read_frame(&mut reader, &limits).await.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FrameTooLarge {
                field: FrameField::Content,
                declared: 5,
                ..
            }
        ));

        let err = decode(b"18446744073709551615\n").await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { .. }));
    }

    #[tokio::test]
    async fn test_non_utf8_path() {
        let err = decode(b"2\n\xff\xfe0\n").await.unwrap_err();
        assert!(matches!(err, ProtocolError::NonUtf8Path));
    }

    #[tokio::test]
    async fn test_crlf_length_lines() {
        let decoded = decode(b"1\r\na2\r\nhi").await.unwrap();
        assert_eq!(decoded, Some(ChangeUnit::new("a", "hi")));
    }
}
