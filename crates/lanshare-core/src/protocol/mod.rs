//! Transfer stream framing.
//!
//! One connection carries exactly one file:
//!
//! ```text
//! ┌──────────────┬─────────────────────┬─────────────────┬──────────┐
//! │ Header len   │ Header (UTF-8 JSON) │ Payload         │ Ack      │
//! │ 4 bytes (BE) │ len bytes           │ `size` bytes    │ "OK"     │
//! └──────────────┴─────────────────────┴─────────────────┴──────────┘
//!   sender → receiver                                      receiver → sender
//! ```
//!
//! The header is `{"name": "<base name>", "size": <bytes>}`. Unknown header
//! fields are ignored.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::TransferError;

/// Length prefix size in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest header the receiver will buffer (64 KB)
pub const MAX_HEADER_LEN: u32 = 64 * 1024;

/// Acknowledgment sent by the receiver once the declared size has arrived
pub const ACK: [u8; 2] = *b"OK";

/// Metadata preceding a file's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferHeader {
    /// File name without any directory component
    pub name: String,
    /// Payload length in bytes
    pub size: u64,
}

impl TransferHeader {
    /// Create a header.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }

    /// Encode as a length-prefixed frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Malformed`] if the encoded header exceeds
    /// [`MAX_HEADER_LEN`].
    pub fn encode(&self) -> Result<Vec<u8>, TransferError> {
        let body = serde_json::to_vec(self)
            .map_err(|e| TransferError::Malformed(format!("failed to encode header: {e}")))?;
        let len = u32::try_from(body.len())
            .ok()
            .filter(|len| *len <= MAX_HEADER_LEN)
            .ok_or_else(|| {
                TransferError::Malformed(format!("header too large: {} bytes", body.len()))
            })?;

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
        frame.extend_from_slice(&len.to_be_bytes());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a header body (without the length prefix).
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Malformed`] if the body is not UTF-8 JSON of
    /// the expected shape.
    pub fn decode(body: &[u8]) -> Result<Self, TransferError> {
        let text = std::str::from_utf8(body)
            .map_err(|_| TransferError::Malformed("header is not valid UTF-8".to_string()))?;
        serde_json::from_str(text)
            .map_err(|e| TransferError::Malformed(format!("invalid header: {e}")))
    }
}

fn read_failure(err: &std::io::Error, what: &str) -> TransferError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        TransferError::Malformed(format!("connection closed while reading {what}"))
    } else {
        TransferError::Unknown(format!("reading {what}: {err}"))
    }
}

/// Write a length-prefixed header.
pub async fn write_header<W>(writer: &mut W, header: &TransferHeader) -> Result<(), TransferError>
where
    W: AsyncWrite + Unpin,
{
    let frame = header.encode()?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| TransferError::Unknown(format!("writing header: {e}")))
}

/// Read a length-prefixed header.
///
/// A connection that closes before the full header arrives, a length above
/// [`MAX_HEADER_LEN`], or an unparsable body all yield
/// [`TransferError::Malformed`].
pub async fn read_header<R>(reader: &mut R) -> Result<TransferHeader, TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| read_failure(&e, "header length"))?;

    let len = u32::from_be_bytes(len_buf);
    if len > MAX_HEADER_LEN {
        return Err(TransferError::Malformed(format!(
            "header length {len} exceeds maximum {MAX_HEADER_LEN}"
        )));
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| read_failure(&e, "header body"))?;

    TransferHeader::decode(&body)
}

/// Send the acknowledgment.
pub async fn write_ack<W>(writer: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&ACK).await?;
    writer.flush().await
}

/// Read and check the acknowledgment.
///
/// Anything other than exactly `"OK"` is [`TransferError::Malformed`]; a
/// connection that closes first is [`TransferError::Unknown`].
pub async fn read_ack<R>(reader: &mut R) -> Result<(), TransferError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; ACK.len()];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            TransferError::Unknown("connection closed before acknowledgment".to_string())
        } else {
            TransferError::Unknown(format!("reading acknowledgment: {e}"))
        }
    })?;

    if buf == ACK {
        Ok(())
    } else {
        Err(TransferError::Malformed(format!(
            "unexpected acknowledgment {:?}",
            String::from_utf8_lossy(&buf)
        )))
    }
}
