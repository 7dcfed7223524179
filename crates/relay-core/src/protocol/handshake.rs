//! One-line handshake that opens every connection.
//!
//! Format: `INIT <name> <kind> \n`. The trailing space before the newline is
//! part of the encoding for compatibility with existing senders; decoding
//! splits on whitespace and ignores any tokens after the kind.

use super::{LineError, ProtocolError, read_line_bounded};
use crate::project::ProjectIdentity;
use std::io;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};

/// First token of the handshake line.
pub const HANDSHAKE_TAG: &str = "INIT";

/// Longest accepted handshake line, excluding the newline.
pub const MAX_HANDSHAKE_LEN: usize = 4096;

impl ProjectIdentity {
    /// Encode as a handshake line, newline included.
    pub fn to_handshake_line(&self) -> String {
        format!("{} {} {} \n", HANDSHAKE_TAG, self.name, self.kind)
    }

    /// Parse a handshake line (with or without its trailing newline).
    pub fn from_handshake_line(line: &str) -> Result<Self, ProtocolError> {
        let mut tokens = line.split_whitespace();
        match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(HANDSHAKE_TAG), Some(name), Some(kind)) => Ok(Self::new(name, kind)),
            (Some(HANDSHAKE_TAG), _, _) => Err(ProtocolError::MalformedHandshake(format!(
                "expected `{} <name> <kind>`, got {:?}",
                HANDSHAKE_TAG,
                line.trim_end()
            ))),
            _ => Err(ProtocolError::MalformedHandshake(format!(
                "line does not start with {}: {:?}",
                HANDSHAKE_TAG,
                line.trim_end()
            ))),
        }
    }
}

/// Send the handshake line and flush it.
pub async fn write_handshake<W>(writer: &mut W, identity: &ProjectIdentity) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(identity.to_handshake_line().as_bytes())
        .await?;
    writer.flush().await
}

/// Read and parse the handshake line.
pub async fn read_handshake<R>(reader: &mut R) -> Result<ProjectIdentity, ProtocolError>
where
    R: AsyncBufRead + Unpin,
{
    let line = match read_line_bounded(reader, MAX_HANDSHAKE_LEN).await {
        Ok(Some(line)) => line,
        Ok(None) | Err(LineError::Truncated) => {
            return Err(ProtocolError::MalformedHandshake(
                "connection closed before handshake completed".to_string(),
            ));
        }
        Err(LineError::TooLong) => {
            return Err(ProtocolError::MalformedHandshake(format!(
                "handshake line longer than {} bytes",
                MAX_HANDSHAKE_LEN
            )));
        }
        Err(LineError::Io(e)) => return Err(ProtocolError::from_read(e)),
    };

    let line = String::from_utf8(line)
        .map_err(|_| ProtocolError::MalformedHandshake("handshake is not valid UTF-8".to_string()))?;
    ProjectIdentity::from_handshake_line(&line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_matches_wire_format() {
        let identity = ProjectIdentity::new("demo", "go");
        assert_eq!(identity.to_handshake_line(), "INIT demo go \n");
    }

    #[tokio::test]
    async fn test_roundtrip() {
        let identity = ProjectIdentity::new("my-project", "rust");
        let mut buf = Vec::new();
        write_handshake(&mut buf, &identity).await.unwrap();

        let mut reader = buf.as_slice();
        assert_eq!(read_handshake(&mut reader).await.unwrap(), identity);
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_leaves_following_frames_unread() {
        let mut reader: &[u8] = b"INIT demo go \n11\nsrc/main.go";
        read_handshake(&mut reader).await.unwrap();
        assert_eq!(reader, b"11\nsrc/main.go");
    }

    #[test]
    fn test_extra_tokens_ignored() {
        let identity = ProjectIdentity::from_handshake_line("INIT demo go extra stuff\n").unwrap();
        assert_eq!(identity, ProjectIdentity::new("demo", "go"));
    }

    #[test]
    fn test_tabs_and_crlf() {
        let identity = ProjectIdentity::from_handshake_line("INIT\tdemo\tgo\r\n").unwrap();
        assert_eq!(identity, ProjectIdentity::new("demo", "go"));
    }

    #[test]
    fn test_too_few_tokens() {
        assert!(matches!(
            ProjectIdentity::from_handshake_line("INIT demo\n"),
            Err(ProtocolError::MalformedHandshake(_))
        ));
        assert!(matches!(
            ProjectIdentity::from_handshake_line("\n"),
            Err(ProtocolError::MalformedHandshake(_))
        ));
    }

    #[test]
    fn test_wrong_tag() {
        assert!(matches!(
            ProjectIdentity::from_handshake_line("HELLO demo go\n"),
            Err(ProtocolError::MalformedHandshake(_))
        ));
        // Tag is case-sensitive
        assert!(matches!(
            ProjectIdentity::from_handshake_line("init demo go\n"),
            Err(ProtocolError::MalformedHandshake(_))
        ));
    }

    #[tokio::test]
    async fn test_closed_before_newline() {
        let mut reader: &[u8] = b"INIT demo go";
        assert!(matches!(
            read_handshake(&mut reader).await,
            Err(ProtocolError::MalformedHandshake(_))
        ));

        let mut empty: &[u8] = b"";
        assert!(matches!(
            read_handshake(&mut empty).await,
            Err(ProtocolError::MalformedHandshake(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_line() {
        let mut line = b"INIT ".to_vec();
        line.extend(std::iter::repeat_n(b'a', MAX_HANDSHAKE_LEN));
        line.extend_from_slice(b" go \n");
        let mut reader = line.as_slice();
        assert!(matches!(
            read_handshake(&mut reader).await,
            Err(ProtocolError::MalformedHandshake(_))
        ));
    }
}
