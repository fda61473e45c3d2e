//! Wire format shared by the point-cloud producer and the ingestion server.
//!
//! A frame is a 4-byte big-endian length prefix followed by that many bytes
//! of payload. The payload is a packed sequence of points, each point being
//! three `f32` values (x, y, z) in the producer's native byte order:
//!
//! ```text
//! ┌──────────────────┬──────────────────────────────────────┐
//! │ Length (4 bytes) │ x0 y0 z0 x1 y1 z1 ... (12 bytes/pt)  │
//! │ Big-endian u32   │ f32, native byte order               │
//! └──────────────────┴──────────────────────────────────────┘
//! ```
//!
//! Everything in this crate is pure: no I/O, no shared state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;
/// Size of one encoded point in bytes.
pub const POINT_SIZE: usize = 12;
/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 8080;
/// Largest payload the server buffers before treating a frame as oversized.
pub const DEFAULT_MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let component = |i: usize| {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
            f32::from_ne_bytes(raw)
        };
        Self {
            x: component(0),
            y: component(1),
            z: component(2),
        }
    }

    fn write_bytes(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.x.to_ne_bytes());
        out.extend_from_slice(&self.y.to_ne_bytes());
        out.extend_from_slice(&self.z.to_ne_bytes());
    }
}

impl From<(f32, f32, f32)> for Point {
    fn from((x, y, z): (f32, f32, f32)) -> Self {
        Self { x, y, z }
    }
}

/// Malformed frame. Always recoverable at the connection level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("payload length {length} is not a multiple of 12")]
    MisalignedPayload { length: u32 },

    #[error("declared payload length {declared} but got {actual} bytes")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("payload length {length} exceeds limit of {limit} bytes")]
    Oversized { length: u32, limit: u32 },
}

/// Decodes the big-endian length prefix.
pub fn decode_header(header: [u8; HEADER_LEN]) -> u32 {
    u32::from_be_bytes(header)
}

pub fn encode_header(length: u32) -> [u8; HEADER_LEN] {
    length.to_be_bytes()
}

/// Decodes a payload of `length` bytes into points.
///
/// Fails with [`ProtocolError::MisalignedPayload`] when `length` is not a
/// multiple of [`POINT_SIZE`], and with [`ProtocolError::LengthMismatch`] when
/// `payload` does not hold exactly `length` bytes. A length of 0 is a valid
/// empty frame.
pub fn decode_payload(payload: &[u8], length: u32) -> Result<Vec<Point>, ProtocolError> {
    if length as usize % POINT_SIZE != 0 {
        return Err(ProtocolError::MisalignedPayload { length });
    }
    if payload.len() != length as usize {
        return Err(ProtocolError::LengthMismatch {
            declared: length,
            actual: payload.len(),
        });
    }

    Ok(payload.chunks_exact(POINT_SIZE).map(Point::from_bytes).collect())
}

/// Encodes points as a payload without the length prefix.
pub fn encode_payload(points: &[Point]) -> Vec<u8> {
    let mut out = Vec::with_capacity(points.len() * POINT_SIZE);
    for point in points {
        point.write_bytes(&mut out);
    }
    out
}

/// Encodes a complete frame: length prefix followed by the payload.
///
/// # Panics
///
/// Panics if the payload would not fit in a `u32` length prefix.
pub fn encode_frame(points: &[Point]) -> Vec<u8> {
    let payload_len = u32::try_from(points.len() * POINT_SIZE)
        .expect("frame payload exceeds u32::MAX bytes");

    let mut out = Vec::with_capacity(HEADER_LEN + payload_len as usize);
    out.extend_from_slice(&encode_header(payload_len));
    for point in points {
        point.write_bytes(&mut out);
    }
    out
}
