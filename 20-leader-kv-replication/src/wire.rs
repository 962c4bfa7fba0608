use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpStream,
    time::timeout,
};

use crate::{
    config::Timeouts,
    message::{Message, ProtocolError},
};

/// Receive-buffer ceiling for a single message, excluding the trailing newline.
pub const MAX_MESSAGE_BYTES: usize = 4096;

const LINE_ENDINGS: &[u8] = b"\r\n";

#[derive(Debug, Error)]
pub enum WireError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("{stage} timed out after {after:?}")]
    TimedOut { stage: &'static str, after: Duration },
    #[error("connection closed before a response arrived")]
    ConnectionClosed,
}

/// Reads one message. Returns `Ok(None)` if the peer closed without sending anything.
///
/// A frame ends at a newline or at EOF, whichever comes first.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, WireError>
where
    R: AsyncBufRead + Unpin,
{
    let mut frame = Vec::new();
    loop {
        frame.clear();
        let mut limited = (&mut *reader).take(MAX_MESSAGE_BYTES as u64 + 1);
        let bytes = limited.read_until(b'\n', &mut frame).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let terminated = frame.last() == Some(&b'\n');
        if !terminated && frame.len() > MAX_MESSAGE_BYTES {
            return Err(WireError::TooLarge {
                limit: MAX_MESSAGE_BYTES,
            });
        }

        let trimmed = trim_line_endings(&frame);
        if trimmed.is_empty() {
            if terminated {
                continue;
            }
            return Ok(None);
        }

        return Ok(Some(Message::decode(trimmed)?));
    }
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = message.encode()?;
    if encoded.len() > MAX_MESSAGE_BYTES {
        return Err(WireError::TooLarge {
            limit: MAX_MESSAGE_BYTES,
        });
    }
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Opens a fresh connection, sends `message`, and waits for exactly one reply.
///
/// Connecting is bounded by `timeouts.connect`; the write and the wait for the
/// reply together are bounded by `timeouts.io`.
pub async fn request(
    addr: SocketAddr,
    message: &Message,
    timeouts: &Timeouts,
) -> Result<Message, WireError> {
    let stream = timeout(timeouts.connect, TcpStream::connect(addr))
        .await
        .map_err(|_| WireError::TimedOut {
            stage: "connect",
            after: timeouts.connect,
        })??;

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let exchange = async {
        write_message(&mut writer, message).await?;
        read_message(&mut reader)
            .await?
            .ok_or(WireError::ConnectionClosed)
    };

    timeout(timeouts.io, exchange)
        .await
        .map_err(|_| WireError::TimedOut {
            stage: "request",
            after: timeouts.io,
        })?
}

fn trim_line_endings(frame: &[u8]) -> &[u8] {
    let end = frame
        .iter()
        .rposition(|byte| !LINE_ENDINGS.contains(byte))
        .map_or(0, |index| index + 1);
    &frame[..end]
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncWriteExt;

    use super::*;

    #[tokio::test]
    async fn reads_what_was_written() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);
        let message = Message::Get {
            key: "x".into(),
            timestamp: Some(3),
        };

        write_message(&mut writer, &message)
            .await
            .expect("write message");
        let parsed = read_message(&mut reader)
            .await
            .expect("read message")
            .expect("expected message");

        assert_eq!(message, parsed);
    }

    #[tokio::test]
    async fn accepts_frame_terminated_by_eof() {
        let (mut writer, reader) = tokio::io::duplex(1024);
        let mut reader = BufReader::new(reader);
        writer
            .write_all(br#"{"type":"PUT","key":"a","value":"b"}"#)
            .await
            .unwrap();
        drop(writer);

        let parsed = read_message(&mut reader).await.unwrap();
        assert_eq!(
            parsed,
            Some(Message::Put {
                key: "a".into(),
                value: "b".into()
            })
        );
    }

    #[tokio::test]
    async fn closed_stream_yields_none() {
        let (writer, reader) = tokio::io::duplex(64);
        drop(writer);
        let mut reader = BufReader::new(reader);
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_frames_over_the_ceiling() {
        let (mut writer, reader) = tokio::io::duplex(16 * 1024);
        let mut reader = BufReader::new(reader);
        let huge = vec![b'a'; MAX_MESSAGE_BYTES + 100];
        writer.write_all(&huge).await.unwrap();
        drop(writer);

        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::TooLarge { .. }));
    }

    #[tokio::test]
    async fn refuses_to_send_oversized_values() {
        let (mut writer, _reader) = tokio::io::duplex(16 * 1024);
        let message = Message::Put {
            key: "k".into(),
            value: "v".repeat(MAX_MESSAGE_BYTES),
        };
        let err = write_message(&mut writer, &message).await.unwrap_err();
        assert!(matches!(err, WireError::TooLarge { .. }));
    }

    #[test]
    fn trims_crlf() {
        assert_eq!(trim_line_endings(b"{}\r\n"), b"{}");
        assert_eq!(trim_line_endings(b"\n"), b"");
    }
}
