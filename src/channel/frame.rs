//! Wire framing for the duplex channel
//!
//! Wire format:
//! ```text
//! Frame:
//!   [4 bytes: body length (u32 BE)]
//!   [1 byte: frame kind (0 = request, 1 = response)]
//!   [8 bytes: correlation id (u64 BE)]
//!   [payload bytes (MessagePack map of string to string)]
//! ```
//!
//! Both peers send requests, so every frame carries the id of the request it
//! starts or answers.

use std::io;

use futures_lite::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};
use crate::message::Message;

/// Kind byte plus correlation id
pub const HEADER_LEN: usize = 1 + 8;

/// Largest accepted frame body (16MB)
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
}

impl FrameKind {
    fn to_byte(self) -> u8 {
        match self {
            FrameKind::Request => 0,
            FrameKind::Response => 1,
        }
    }

    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(FrameKind::Request),
            1 => Ok(FrameKind::Response),
            other => Err(Error::InvalidProtocol(format!("unknown frame kind {other}"))),
        }
    }
}

/// Frame parsed from the wire, payload not yet decoded
#[derive(Debug)]
pub struct RawFrame {
    pub kind: FrameKind,
    pub id: u64,
    /// Raw MessagePack payload
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Parse a frame body (after the length prefix)
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::InvalidProtocol("truncated frame header".to_string()));
        }

        let kind = FrameKind::from_byte(data[0])?;
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&data[1..HEADER_LEN]);

        Ok(Self {
            kind,
            id: u64::from_be_bytes(id_bytes),
            payload: data[HEADER_LEN..].to_vec(),
        })
    }

    pub fn decode_message(&self) -> Result<Message> {
        rmp_serde::from_slice(&self.payload).map_err(Error::from)
    }
}

/// Serialize a frame, length prefix included
pub fn encode_frame(kind: FrameKind, id: u64, message: &Message) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec(message)?;

    let body_len = HEADER_LEN + payload.len();
    if body_len > MAX_FRAME_LEN {
        return Err(Error::InvalidProtocol(format!(
            "frame of {body_len} bytes exceeds limit"
        )));
    }

    let mut buf = Vec::with_capacity(4 + body_len);
    // Body length (u32 BE)
    buf.extend_from_slice(&(body_len as u32).to_be_bytes());
    buf.push(kind.to_byte());
    buf.extend_from_slice(&id.to_be_bytes());
    buf.extend_from_slice(&payload);

    Ok(buf)
}

/// Read one frame. `Ok(None)` means the peer closed the stream between frames;
/// an end of stream anywhere inside a frame is an error.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<RawFrame>> {
    let mut len_buf = [0u8; 4];
    loop {
        match reader.read(&mut len_buf[..1]).await {
            Ok(0) => return Ok(None),
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let len = u32::from_be_bytes(len_buf) as usize;
    if !(HEADER_LEN..=MAX_FRAME_LEN).contains(&len) {
        return Err(Error::InvalidProtocol(format!("invalid frame length: {len}")));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    RawFrame::from_bytes(&body).map(Some)
}
