// Citymesh Gateway - Durable store-and-forward uplink
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for the gateway uplink

use std::path::PathBuf;

/// Uplink configuration for one gateway node
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// Topic prefix for published messages (default: "citymesh")
    pub base_topic: String,

    /// Service group id baked into the topic path
    pub service_id: u32,

    /// Backing file for the durable queue
    pub buffer_path: PathBuf,

    /// Total byte budget for the queue store
    pub max_buffer_bytes: usize,

    /// Largest single frame accepted by the queue
    pub max_frame_bytes: usize,

    /// Minimum spacing between reconnect attempts
    pub reconnect_interval_ms: u64,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            base_topic: "citymesh".to_string(),
            service_id: 1,
            buffer_path: PathBuf::from("citymesh-buffer.bin"),
            max_buffer_bytes: 10_240,
            max_frame_bytes: 256,
            reconnect_interval_ms: 10_000,
        }
    }
}

impl UplinkConfig {
    /// Create a configuration with a custom base topic
    pub fn with_base_topic(base_topic: impl Into<String>) -> Self {
        Self {
            base_topic: base_topic.into(),
            ..Default::default()
        }
    }

    /// Set the service group id
    pub fn service_id(mut self, id: u32) -> Self {
        self.service_id = id;
        self
    }

    /// Set the queue backing file
    pub fn buffer_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.buffer_path = path.into();
        self
    }
}
