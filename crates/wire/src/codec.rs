// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Wire codec: 4-byte big-endian length prefix + JSON payload.
//!
//! Shared by both legs of the protocol — the broker reads `Command`
//! frames written by itself and `RunnerEvent`/`AttachRequest` frames
//! written by the runner, over the same framing.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size accepted on read, guarding against a malformed or
/// hostile length prefix turning into an unbounded allocation.
pub const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("timed out waiting for frame")]
    Timeout,
    #[error("frame of {0} bytes exceeds max {MAX_FRAME_BYTES}")]
    FrameTooLarge(u32),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize a value to raw JSON bytes (no length prefix).
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(value)?)
}

/// Deserialize a value from raw JSON bytes.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Write one length-prefixed frame.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), ProtocolError> {
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge(u32::MAX))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, with no timeout (caller wraps as needed).
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ProtocolError::ConnectionClosed)
        }
        Err(e) => return Err(ProtocolError::Io(e)),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::ConnectionClosed
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(buf)
}

/// Read one frame, decoded as `T`, bounded by `timeout`.
pub async fn read_frame<R: AsyncRead + Unpin, T: DeserializeOwned>(
    reader: &mut R,
    timeout: Duration,
) -> Result<T, ProtocolError> {
    let bytes = tokio::time::timeout(timeout, read_message(reader))
        .await
        .map_err(|_| ProtocolError::Timeout)??;
    decode(&bytes)
}

/// Write one frame, encoded from `T`, bounded by `timeout`.
pub async fn write_frame<W: AsyncWrite + Unpin, T: Serialize>(
    writer: &mut W,
    value: &T,
    timeout: Duration,
) -> Result<(), ProtocolError> {
    let bytes = encode(value)?;
    tokio::time::timeout(timeout, write_message(writer, &bytes))
        .await
        .map_err(|_| ProtocolError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_returns_json_without_length_prefix() {
        let encoded = encode(&serde_json::json!({"ok": true})).expect("encode");
        let json_str = std::str::from_utf8(&encoded).expect("utf8");
        assert!(json_str.starts_with('{'));
    }

    #[tokio::test]
    async fn read_write_message_roundtrip() {
        let original = b"hello world";
        let mut buffer = Vec::new();
        write_message(&mut buffer, original).await.expect("write");
        assert_eq!(buffer.len(), 4 + original.len());

        let mut cursor = std::io::Cursor::new(buffer);
        let read_back = read_message(&mut cursor).await.expect("read");
        assert_eq!(read_back, original);
    }

    #[tokio::test]
    async fn write_message_adds_big_endian_length_prefix() {
        let data = b"test data";
        let mut buffer = Vec::new();
        write_message(&mut buffer, data).await.expect("write");
        let len = u32::from_be_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]) as usize;
        assert_eq!(len, data.len());
        assert_eq!(&buffer[4..], data);
    }

    #[tokio::test]
    async fn read_message_on_empty_stream_is_connection_closed() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let err = read_message(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected_before_allocating() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(buffer);
        let err = read_message(&mut cursor).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(_)));
    }

    #[tokio::test]
    async fn read_frame_times_out_on_a_stalled_reader() {
        let (mut _tx, mut rx) = tokio::io::duplex(64);
        let result: Result<serde_json::Value, _> =
            read_frame(&mut rx, Duration::from_millis(20)).await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }
}
