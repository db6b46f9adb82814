//! Error types for citymesh
//!
//! This module defines all error types used by the protocol core.

use thiserror::Error;

/// Result type alias for citymesh operations
pub type Result<T> = std::result::Result<T, MeshError>;

/// Main error type for citymesh operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MeshError {
    /// Encoding error
    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    /// Decoding error
    #[error("Decoding error: {0}")]
    Decode(#[from] DecodeError),

    /// Transport send error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Sensor read error
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),
}

/// Errors during envelope encoding
///
/// An encode failure never leaves partial output claimed as success:
/// callers may retry with a larger buffer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    /// Destination buffer too small for the next field or entry
    #[error("Buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// Sensor id exceeds the wire limit
    #[error("Sensor id too long: {len} bytes exceeds maximum {max}")]
    SensorIdTooLong { len: usize, max: usize },

    /// Reading key exceeds the one-byte length prefix
    #[error("Reading key too long: {len} bytes exceeds maximum {max}")]
    KeyTooLong { len: usize, max: usize },

    /// Reading key is empty (zero-length keys are not representable)
    #[error("Reading key is empty")]
    EmptyKey,
}

/// Errors during envelope decoding
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Input ended before a complete field
    #[error("Truncated input: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    /// Unknown envelope tag byte
    #[error("Unknown envelope tag: 0x{0:02x}")]
    UnknownTag(u8),

    /// Role byte outside the defined range
    #[error("Unknown role value: {0}")]
    UnknownRole(u8),

    /// Zero-length reading key in the stream
    #[error("Empty reading key at offset {offset}")]
    EmptyKey { offset: usize },

    /// String field is not valid UTF-8
    #[error("Invalid UTF-8 in string field at offset {offset}")]
    BadUtf8 { offset: usize },
}

/// Errors reported by the external transport send primitive
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Transport rejected or failed the send
    #[error("Send to 0x{to:08x} failed: {reason}")]
    SendFailed { to: u32, reason: String },
}

/// Errors reported by a sensor capability
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SensorError {
    /// Hardware read failed
    #[error("Sensor read failed: {0}")]
    ReadFailed(String),
}
