//! Encoding and decoding of envelopes and bus frames.
//!
//! Clients speak JSON text. Bus frames travel between instances as
//! MessagePack with named fields.

use bytes::Bytes;
use thiserror::Error;

use crate::bus::{BusFrame, BUS_VERSION};
use crate::event::Envelope;

/// Maximum encoded bus frame size (1 MiB).
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Errors that can occur while encoding or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Frame published by an incompatible bus version.
    #[error("Incompatible bus version {0}")]
    IncompatibleVersion(crate::bus::Version),
}

/// Encode an envelope as a JSON text payload.
///
/// # Errors
///
/// Returns an error if the content cannot be serialized.
pub fn encode_envelope(envelope: &Envelope) -> Result<Bytes, ProtocolError> {
    Ok(Bytes::from(serde_json::to_vec(envelope)?))
}

/// Decode a JSON envelope received from a client.
///
/// # Errors
///
/// Returns an error if the payload is not a valid envelope.
pub fn decode_envelope(data: &[u8]) -> Result<Envelope, ProtocolError> {
    Ok(serde_json::from_slice(data)?)
}

/// Encode a bus frame.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_frame(frame: &BusFrame) -> Result<Bytes, ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }

    Ok(Bytes::from(payload))
}

/// Decode a bus frame, rejecting incompatible versions.
///
/// # Errors
///
/// Returns an error if the data is too large, invalid, or from an
/// incompatible publisher.
pub fn decode_frame(data: &[u8]) -> Result<BusFrame, ProtocolError> {
    if data.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(data.len()));
    }

    let frame: BusFrame = rmp_serde::from_slice(data)?;
    if !BUS_VERSION.is_compatible_with(&frame.version) {
        return Err(ProtocolError::IncompatibleVersion(frame.version));
    }

    Ok(frame)
}
