//! Minimal client side of the Dask TCP comm protocol.
//!
//! A message on the wire is
//! `total: u64 | n_frames: u64 | len(frame_i): u64 ... | frame_0 ... frame_n`
//! with all integers little endian. The first frame holds the msgpack
//! encoded message, further frames only carry serialized payloads, which the
//! operator never sends or needs.
use std::time::Duration;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Upper bound for a single inbound message
const MAX_MESSAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Handshake both ends exchange right after connecting
#[derive(Debug, Serialize, Deserialize)]
struct Handshake {
    compression: Option<String>,
    python: (u8, u8, u8),
    #[serde(rename = "pickle-protocol")]
    pickle_protocol: u8,
}

impl Default for Handshake {
    fn default() -> Self {
        Self {
            compression: None,
            python: (3, 10, 0),
            pickle_protocol: 5,
        }
    }
}

pub(crate) struct Comm {
    stream: TcpStream,
}

impl Comm {
    /// Connect to `address` (`host:port`) and perform the comm handshake
    pub async fn connect(address: &str, timeout: Duration) -> Result<Self, CommError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| CommError::ConnectTimeout(address.to_owned(), timeout))??;
        stream.set_nodelay(true)?;

        let mut comm = Self { stream };
        comm.write(&Handshake::default()).await?;
        let _remote: Handshake = comm.read().await?;
        Ok(comm)
    }

    #[cfg(test)]
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn write<T: Serialize>(&mut self, msg: &T) -> Result<(), CommError> {
        let frame = rmp_serde::to_vec_named(msg)?;
        let buf = encode_frames(&[frame]);
        self.stream.write_all(&buf).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn read<T: DeserializeOwned>(&mut self) -> Result<T, CommError> {
        let total = self.stream.read_u64_le().await?;
        if total > MAX_MESSAGE_BYTES {
            return Err(CommError::Malformed(format!(
                "message of {total} bytes exceeds limit"
            )));
        }
        // PANIC: bounded by MAX_MESSAGE_BYTES above
        let mut buf = vec![0u8; total as usize];
        self.stream.read_exact(&mut buf).await?;
        let frames = decode_frames(&buf)?;
        let first = frames
            .first()
            .ok_or_else(|| CommError::Malformed("message without frames".to_owned()))?;
        Ok(rmp_serde::from_slice(first)?)
    }
}

/// Prefix `frames` with the total length and the frame length table
pub(crate) fn encode_frames(frames: &[Vec<u8>]) -> Vec<u8> {
    let mut header = Vec::with_capacity(8 * (frames.len() + 1));
    header.extend_from_slice(&(frames.len() as u64).to_le_bytes());
    for frame in frames {
        header.extend_from_slice(&(frame.len() as u64).to_le_bytes());
    }
    let body_len: usize = frames.iter().map(Vec::len).sum();
    let total = (header.len() + body_len) as u64;

    let mut buf = Vec::with_capacity(8 + header.len() + body_len);
    buf.extend_from_slice(&total.to_le_bytes());
    buf.extend_from_slice(&header);
    for frame in frames {
        buf.extend_from_slice(frame);
    }
    buf
}

/// Split a message body (everything after the total length) into frames
pub(crate) fn decode_frames(buf: &[u8]) -> Result<Vec<&[u8]>, CommError> {
    let mut cursor = 0usize;
    let next_u64 = |cursor: &mut usize| -> Result<u64, CommError> {
        let bytes = buf
            .get(*cursor..*cursor + 8)
            .ok_or_else(|| CommError::Malformed("truncated frame header".to_owned()))?;
        *cursor += 8;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    };

    let n_frames = next_u64(&mut cursor)?;
    let lengths = (0..n_frames)
        .map(|_| next_u64(&mut cursor))
        .collect::<Result<Vec<_>, _>>()?;

    let mut frames = Vec::with_capacity(lengths.len());
    for len in lengths {
        let end = usize::try_from(len)
            .ok()
            .and_then(|len| cursor.checked_add(len))
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| CommError::Malformed("frame exceeds message".to_owned()))?;
        frames.push(&buf[cursor..end]);
        cursor = end;
    }
    Ok(frames)
}

#[derive(Debug, Error)]
pub(crate) enum CommError {
    #[error("IO error on comm: {0}")]
    Io(#[from] std::io::Error),
    #[error("Connecting to {0} timed out after {1:?}")]
    ConnectTimeout(String, Duration),
    #[error("Could not encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("Could not decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("Malformed message: {0}")]
    Malformed(String),
}
