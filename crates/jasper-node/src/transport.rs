//! Line-delimited JSON framing over a pair of byte streams.
//!
//! Inbound lines are handed to the dispatch loop raw, so one bad line is
//! dropped without tearing the stream down. Outbound messages are queued on an
//! unbounded channel and written by a single writer task, which keeps every
//! line intact no matter how many handlers send at once.

use crate::message::Message;
use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Read the next non-empty line, or `None` at end of stream. Lines that are
/// not valid UTF-8 are skipped.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    loop {
        raw.clear();
        let bytes = reader.read_until(b'\n', &mut raw).await?;
        if bytes == 0 {
            return Ok(None);
        }

        let line = match String::from_utf8(std::mem::take(&mut raw)) {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, len = bytes, "dropping line that is not UTF-8");
                continue;
            }
        };
        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.trim().is_empty() {
            continue;
        }
        return Ok(Some(trimmed.to_string()));
    }
}

/// Encode one message, append the newline delimiter, and flush.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

/// Drain `outbound` into `writer` until the channel closes or `shutdown`
/// fires. On shutdown, lines already queued are still written.
pub async fn run_writer<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    shutdown: CancellationToken,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;
            next = outbound.recv() => match next {
                Some(message) => write_message(&mut writer, &message).await?,
                None => break,
            },
            _ = shutdown.cancelled() => {
                while let Ok(message) = outbound.try_recv() {
                    write_message(&mut writer, &message).await?;
                }
                break;
            }
        }
    }
    writer.shutdown().await.or_else(|err| {
        warn!(error = %err, "failed to close outbound stream");
        Ok(())
    })
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Body;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_read_line_skips_blank_lines() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\n\r\n{\"a\":1}\r\n")
            .read(b"{\"b\":2}\n")
            .build();
        let mut reader = BufReader::new(mock);

        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("{\"b\":2}"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_line_skips_invalid_utf8() {
        let mock = tokio_test::io::Builder::new()
            .read(b"\xff\xfe garbage\n")
            .read(b"{\"a\":1}\n")
            .build();
        let mut reader = BufReader::new(mock);

        assert_eq!(read_line(&mut reader).await.unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(read_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_message_appends_newline() {
        let message = Message {
            src: "n1".into(),
            dest: "c1".into(),
            body: Body::new("init_ok"),
        };
        let mut mock = tokio_test::io::Builder::new()
            .write(b"{\"src\":\"n1\",\"dest\":\"c1\",\"body\":{\"type\":\"init_ok\"}}\n")
            .build();

        write_message(&mut mock, &message).await.unwrap();
    }

    #[tokio::test]
    async fn test_writer_drains_queue_on_shutdown() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (client, server) = tokio::io::duplex(4096);
        let shutdown = CancellationToken::new();

        for i in 0..3u64 {
            tx.send(Message {
                src: "n1".into(),
                dest: "c1".into(),
                body: Body::new("tick").with("i", i),
            })
            .unwrap();
        }
        shutdown.cancel();
        run_writer(server, rx, shutdown).await.unwrap();

        let mut reader = BufReader::new(client);
        let mut seen = Vec::new();
        while let Some(line) = read_line(&mut reader).await.unwrap() {
            seen.push(Message::decode(&line).unwrap().body.field::<u64>("i").unwrap());
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }
}
