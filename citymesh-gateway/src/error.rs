// Citymesh Gateway - Durable store-and-forward uplink
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the gateway uplink

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Durable queue failure
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Backhaul publish failure
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Mesh codec failure while handling an envelope
    #[error("Codec error: {0}")]
    Codec(#[from] citymesh::MeshError),

    /// Uplink payload serialization failure
    #[error("Payload serialization: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised by the durable queue
#[derive(Error, Debug)]
pub enum QueueError {
    /// Appending would exceed the configured capacity
    #[error("Queue full: frame needs {needed} bytes, capacity {capacity}")]
    Full { needed: usize, capacity: usize },

    /// A single frame exceeds the per-frame limit
    #[error("Frame too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// The queue holds no frames
    #[error("Queue is empty")]
    Empty,

    /// The backing store does not parse as a frame sequence
    #[error("Corrupt queue store: {reason}")]
    Corrupt { reason: String },

    /// Filesystem failure on the backing store
    #[error("Queue I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the backhaul publisher
#[derive(Error, Debug)]
pub enum PublishError {
    /// No backhaul session is established
    #[error("Not connected to backhaul")]
    NotConnected,

    /// The broker refused the message
    #[error("Publish rejected: {0}")]
    Rejected(String),

    /// Session establishment failed
    #[error("Connect failed: {0}")]
    ConnectFailed(String),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_error_converts() {
        let err: GatewayError = QueueError::Full {
            needed: 300,
            capacity: 256,
        }
        .into();
        assert!(matches!(err, GatewayError::Queue(QueueError::Full { .. })));
    }

    #[test]
    fn test_error_display() {
        let err = QueueError::FrameTooLarge { len: 300, max: 256 };
        assert_eq!(err.to_string(), "Frame too large: 300 bytes (max: 256)");
    }
}
