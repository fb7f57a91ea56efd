//! SSH agent binary wire protocol (spec §4.H) — 4-byte big-endian
//! length prefix, one message-type byte, then a type-specific payload.
//! Hand-framed; no new framing dependency (same IO idiom
//! `cli/src/command_runner.rs` already uses for concurrent stdout/stderr
//! draining, just with `read_u32`/`write_u32` instead of `read_to_end`).

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Hard cap on a single agent message, matching OpenSSH's own agent
/// implementation (prevents a misbehaving client from forcing an
/// unbounded allocation).
const MAX_MESSAGE_LEN: u32 = 256 * 1024;

pub const SSH_AGENT_FAILURE: u8 = 5;
pub const SSH_AGENT_SUCCESS: u8 = 6;
pub const SSH_AGENTC_REQUEST_IDENTITIES: u8 = 11;
pub const SSH_AGENT_IDENTITIES_ANSWER: u8 = 12;
pub const SSH_AGENTC_SIGN_REQUEST: u8 = 13;
pub const SSH_AGENT_SIGN_RESPONSE: u8 = 14;
pub const SSH_AGENTC_ADD_IDENTITY: u8 = 17;
pub const SSH_AGENTC_REMOVE_IDENTITY: u8 = 18;
pub const SSH_AGENTC_REMOVE_ALL_IDENTITIES: u8 = 19;
pub const SSH_AGENTC_LOCK: u8 = 22;
pub const SSH_AGENTC_UNLOCK: u8 = 23;
pub const SSH_AGENTC_EXTENSION: u8 = 27;
pub const SSH_AGENT_EXTENSION_FAILURE: u8 = 28;

pub const SSH_AGENT_RSA_SHA2_256: u32 = 1 << 1;
pub const SSH_AGENT_RSA_SHA2_512: u32 = 1 << 2;

/// Read one framed message: the 4-byte length prefix covers the
/// message-type byte plus payload.
pub async fn read_message<R: tokio::io::AsyncRead + Unpin>(
    stream: &mut R,
) -> std::io::Result<(u8, Vec<u8>)> {
    let len = stream.read_u32().await?;
    if len == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "zero-length agent message",
        ));
    }
    if len > MAX_MESSAGE_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "agent message exceeds the maximum allowed length",
        ));
    }
    let msg_type = stream.read_u8().await?;
    let mut payload = vec![0u8; (len - 1) as usize];
    stream.read_exact(&mut payload).await?;
    Ok((msg_type, payload))
}

pub async fn write_message<W: tokio::io::AsyncWrite + Unpin>(
    stream: &mut W,
    msg_type: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    let len = u32::try_from(payload.len() + 1)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "message too large"))?;
    stream.write_u32(len).await?;
    stream.write_u8(msg_type).await?;
    stream.write_all(payload).await?;
    stream.flush().await
}

/// Append an SSH-wire-format string (4-byte big-endian length prefix,
/// then raw bytes) to `buf`.
pub fn put_string(buf: &mut Vec<u8>, data: &[u8]) {
    #[allow(clippy::cast_possible_truncation)]
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

/// Append a big-endian `u32` to `buf`.
pub fn put_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_be_bytes());
}

/// A forward-only cursor over an in-memory payload, for parsing
/// client-sent messages (`SIGN_REQUEST`, `ADD_IDENTITY`, ...).
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_string(&mut self) -> Result<&'a [u8], String> {
        let len = self.read_u32()? as usize;
        let end = self
            .pos
            .checked_add(len)
            .ok_or_else(|| "string length overflow".to_string())?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| "string length exceeds message".to_string())?;
        self.pos = end;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32, String> {
        let end = self
            .pos
            .checked_add(4)
            .ok_or_else(|| "u32 read overflow".to_string())?;
        let bytes = self
            .data
            .get(self.pos..end)
            .ok_or_else(|| "not enough bytes for u32".to_string())?;
        self.pos = end;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_u8(&mut self) -> Result<u8, String> {
        let byte = self
            .data
            .get(self.pos)
            .copied()
            .ok_or_else(|| "not enough bytes for u8".to_string())?;
        self.pos += 1;
        Ok(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_message_through_a_pipe() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        write_message(&mut a, SSH_AGENTC_REQUEST_IDENTITIES, &[])
            .await
            .expect("write");
        let (msg_type, payload) = read_message(&mut b).await.expect("read");
        assert_eq!(msg_type, SSH_AGENTC_REQUEST_IDENTITIES);
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn rejects_an_oversized_length_prefix() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        a.write_u32(u32::MAX).await.expect("write len");
        let err = read_message(&mut b).await.expect_err("must reject");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn cursor_reads_strings_and_integers_in_order() {
        let mut buf = Vec::new();
        put_string(&mut buf, b"ssh-ed25519");
        put_u32(&mut buf, 42);
        let mut cursor = Cursor::new(&buf);
        assert_eq!(cursor.read_string().expect("string"), b"ssh-ed25519");
        assert_eq!(cursor.read_u32().expect("u32"), 42);
    }

    #[test]
    fn cursor_rejects_a_truncated_string_length() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 100);
        buf.extend_from_slice(b"short");
        let mut cursor = Cursor::new(&buf);
        assert!(cursor.read_string().is_err());
    }
}
