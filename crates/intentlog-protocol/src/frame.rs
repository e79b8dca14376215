// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for intent log stream framing.
//!
//! Each frame, in both directions:
//! - 16 bytes: intent id (UUID)
//! - 1 byte: action (request) or outcome (response) code
//! - 4 bytes: payload length (big-endian)
//! - N bytes: opaque payload
//!
//! EOF at a frame boundary is a normal disconnect ([`FrameError::ConnectionClosed`]);
//! EOF anywhere inside a frame is a protocol error ([`FrameError::Truncated`]).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::message::{Action, INTENT_ID_SIZE, Outcome, Request, Response};

/// Maximum payload size (64 MB)
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Frame header size (16 bytes id + 1 byte code + 4 bytes length)
pub const HEADER_SIZE: usize = INTENT_ID_SIZE + 1 + 4;

/// Errors that can occur during frame encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("payload too large: {0} bytes (max: {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),

    #[error("invalid action code: {0}")]
    InvalidAction(u8),

    #[error("invalid outcome code: {0}")]
    InvalidOutcome(u8),

    #[error("stream closed in the middle of a frame")]
    Truncated,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

impl FrameError {
    /// Whether this error is a normal peer-initiated disconnect rather than a
    /// protocol or transport failure.
    pub fn is_clean_close(&self) -> bool {
        matches!(self, FrameError::ConnectionClosed)
    }
}

fn encode_frame(intent_id: &Uuid, code: u8, payload: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(intent_id.as_bytes());
    buf.put_u8(code);
    buf.put_u32(payload.len() as u32);
    buf.put(payload.clone());
    buf.freeze()
}

fn decode_header(header: &[u8; HEADER_SIZE]) -> Result<(Uuid, u8, usize), FrameError> {
    let mut id = [0u8; INTENT_ID_SIZE];
    id.copy_from_slice(&header[..INTENT_ID_SIZE]);
    let code = header[INTENT_ID_SIZE];
    let length = u32::from_be_bytes([
        header[INTENT_ID_SIZE + 1],
        header[INTENT_ID_SIZE + 2],
        header[INTENT_ID_SIZE + 3],
        header[INTENT_ID_SIZE + 4],
    ]) as usize;

    if length > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(length));
    }

    Ok((Uuid::from_bytes(id), code, length))
}

/// Read a full header, distinguishing EOF before the first byte (clean close)
/// from EOF inside the header (truncated frame).
async fn read_header<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(Uuid, u8, usize), FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    let mut filled = 0;
    while filled < HEADER_SIZE {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            return Err(if filled == 0 {
                FrameError::ConnectionClosed
            } else {
                FrameError::Truncated
            });
        }
        filled += n;
    }
    decode_header(&header)
}

async fn read_payload<R: AsyncRead + Unpin>(
    reader: &mut R,
    length: usize,
) -> Result<Bytes, FrameError> {
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            FrameError::Truncated
        } else {
            FrameError::Io(e)
        }
    })?;
    Ok(Bytes::from(payload))
}

/// Read one request frame from an async reader.
pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Request, FrameError> {
    let (intent_id, code, length) = read_header(reader).await?;
    let action = Action::try_from(code)?;
    let payload = read_payload(reader, length).await?;
    Ok(Request {
        intent_id,
        action,
        payload,
    })
}

/// Read one response frame from an async reader.
pub async fn read_response<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Response, FrameError> {
    let (intent_id, code, length) = read_header(reader).await?;
    let outcome = Outcome::try_from(code)?;
    let payload = read_payload(reader, length).await?;
    Ok(Response {
        intent_id,
        outcome,
        payload,
    })
}

/// Write one request frame to an async writer.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    request: &Request,
) -> Result<(), FrameError> {
    if request.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(request.payload.len()));
    }
    let encoded = encode_frame(&request.intent_id, request.action as u8, &request.payload);
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Write one response frame to an async writer.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> Result<(), FrameError> {
    if response.payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(response.payload.len()));
    }
    let encoded = encode_frame(
        &response.intent_id,
        response.outcome as u8,
        &response.payload,
    );
    writer.write_all(&encoded).await?;
    Ok(())
}

impl Request {
    /// Encode the request to bytes for wire transmission.
    pub fn encode(&self) -> Bytes {
        encode_frame(&self.intent_id, self.action as u8, &self.payload)
    }

    /// Decode a request from a byte buffer. Trailing bytes are ignored.
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated);
        }
        let mut header = [0u8; HEADER_SIZE];
        bytes.copy_to_slice(&mut header);
        let (intent_id, code, length) = decode_header(&header)?;
        let action = Action::try_from(code)?;
        if bytes.len() < length {
            return Err(FrameError::Truncated);
        }
        Ok(Self {
            intent_id,
            action,
            payload: bytes.split_to(length),
        })
    }
}

impl Response {
    /// Encode the response to bytes for wire transmission.
    pub fn encode(&self) -> Bytes {
        encode_frame(&self.intent_id, self.outcome as u8, &self.payload)
    }

    /// Decode a response from a byte buffer. Trailing bytes are ignored.
    pub fn decode_from_bytes(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::Truncated);
        }
        let mut header = [0u8; HEADER_SIZE];
        bytes.copy_to_slice(&mut header);
        let (intent_id, code, length) = decode_header(&header)?;
        let outcome = Outcome::try_from(code)?;
        if bytes.len() < length {
            return Err(FrameError::Truncated);
        }
        Ok(Self {
            intent_id,
            outcome,
            payload: bytes.split_to(length),
        })
    }
}
