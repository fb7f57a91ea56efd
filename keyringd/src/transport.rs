//! Framed UNIX transport (spec §4.A) — newline-delimited JSON over
//! `AF_UNIX`, with deadline-honouring, cancellation-aware reads.
//!
//! Grounded on `cli/src/command_runner.rs`'s `tokio::select!`
//! timeout-with-kill shape, adapted from "race a deadline against a child
//! process" to "race a deadline and a cancellation token against a socket
//! read".

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;

/// Outcome of a single `read_frame` call.
#[derive(Debug)]
pub enum FrameEvent<T> {
    Frame(T),
    Cancelled,
    DeadlineExceeded,
    /// Peer closed the connection. Per spec §4.A, EOF on a waiting read is
    /// never a protocol error by itself — callers decide what it means
    /// (e.g. user cancellation).
    Eof,
}

/// A newline-delimited JSON connection, split so reads and writes can be
/// driven independently (the write half is used by the two-phase retry
/// protocol in `prompt::rich_ipc` to send result/retry frames while a read
/// is outstanding).
pub struct FramedConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl FramedConnection {
    #[must_use]
    pub fn new(stream: UnixStream) -> Self {
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    /// Read one `\n`-delimited JSON frame, honouring `token` and `deadline`.
    ///
    /// On cancellation the write half is shut down to unblock the
    /// in-progress read, and the read future is given up to one second to
    /// observe EOF before being abandoned (detached, not further awaited).
    pub async fn read_frame<T: DeserializeOwned>(
        &mut self,
        token: &CancellationToken,
        deadline: tokio::time::Instant,
    ) -> FrameEvent<T> {
        let mut line = String::new();
        tokio::select! {
            biased;
            () = token.cancelled() => {
                let _ = self.writer.shutdown().await;
                let _ = tokio::time::timeout(
                    Duration::from_secs(1),
                    self.reader.read_line(&mut line),
                )
                .await;
                FrameEvent::Cancelled
            }
            () = tokio::time::sleep_until(deadline) => FrameEvent::DeadlineExceeded,
            result = self.reader.read_line(&mut line) => {
                match result {
                    Ok(0) => FrameEvent::Eof,
                    Ok(_) => match serde_json::from_str::<T>(line.trim_end()) {
                        Ok(frame) => FrameEvent::Frame(frame),
                        Err(_) => FrameEvent::Eof,
                    },
                    Err(_) => FrameEvent::Eof,
                }
            }
        }
    }

    /// Write one JSON value followed by `\n`.
    pub async fn write_frame<T: Serialize>(&mut self, value: &T) -> std::io::Result<()> {
        let mut payload = serde_json::to_vec(value)?;
        payload.push(b'\n');
        self.writer.write_all(&payload).await
    }

    pub async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        n: u32,
    }

    #[tokio::test]
    async fn round_trips_a_frame() {
        let (a, b) = UnixStream::pair().expect("pair");
        let mut server = FramedConnection::new(a);
        let mut client = FramedConnection::new(b);

        client.write_frame(&Ping { n: 7 }).await.expect("write");
        let token = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        match server.read_frame::<Ping>(&token, deadline).await {
            FrameEvent::Frame(p) => assert_eq!(p, Ping { n: 7 }),
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_unblocks_a_pending_read() {
        let (a, _b) = UnixStream::pair().expect("pair");
        let mut server = FramedConnection::new(a);
        let token = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);

        let token2 = token.clone();
        let handle = tokio::spawn(async move { server.read_frame::<Ping>(&token2, deadline).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should unblock promptly")
            .expect("task did not panic");
        assert!(matches!(outcome, FrameEvent::Cancelled));
    }

    #[tokio::test]
    async fn eof_on_closed_peer_is_reported_as_eof_not_a_frame() {
        let (a, b) = UnixStream::pair().expect("pair");
        drop(b);
        let mut server = FramedConnection::new(a);
        let token = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let outcome = server.read_frame::<Ping>(&token, deadline).await;
        assert!(matches!(outcome, FrameEvent::Eof));
    }

    #[tokio::test]
    async fn deadline_exceeded_is_reported_when_peer_is_silent() {
        let (a, _b) = UnixStream::pair().expect("pair");
        let mut server = FramedConnection::new(a);
        let token = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(30);
        let outcome = server.read_frame::<Ping>(&token, deadline).await;
        assert!(matches!(outcome, FrameEvent::DeadlineExceeded));
    }
}
