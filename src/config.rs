//! Node configuration
//!
//! Plain values handed in by the embedding application; persistence
//! (NVS, flash, files) is the embedder's concern.

use crate::protocol::{NodeId, Role};

/// How discovery announcements are exchanged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryMode {
    /// Fire-and-forget periodic broadcast; no replies expected
    #[default]
    Broadcast,
    /// Periodic broadcast carries a request flag; peers offering a
    /// service reply unicast with their own advertisement
    RequestResponse,
}

/// Configuration for one mesh node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Behavior class of this node
    pub role: Role,

    /// Service group this node belongs to (0 = none)
    pub service_id: u32,

    /// Fixed forwarding target; 0 means resolve via the directory
    pub target_node_id: NodeId,

    /// How often a sensor-role node reads its hardware
    pub sensor_read_interval_ms: u64,

    /// How often discovery announcements go out
    pub discovery_interval_ms: u64,

    /// Age beyond which a directory record is evicted
    pub service_timeout_ms: u64,

    /// Announcement exchange style
    pub discovery_mode: DiscoveryMode,

    /// Upper bound for an encoded outbound envelope
    pub max_packet_bytes: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: Role::Sensor,
            service_id: 1,
            target_node_id: 0,
            sensor_read_interval_ms: 60_000,
            discovery_interval_ms: 300_000,
            service_timeout_ms: 900_000, // 3x discovery interval
            discovery_mode: DiscoveryMode::Broadcast,
            max_packet_bytes: 256,
        }
    }
}

impl NodeConfig {
    /// Configuration for a node with the given role
    pub fn with_role(role: Role) -> Self {
        Self {
            role,
            ..Default::default()
        }
    }

    /// Set the service group id
    pub fn service_id(mut self, id: u32) -> Self {
        self.service_id = id;
        self
    }

    /// Pin forwarding to a fixed peer instead of directory lookup
    pub fn target(mut self, node: NodeId) -> Self {
        self.target_node_id = node;
        self
    }

    /// Use request/response discovery
    pub fn request_response(mut self) -> Self {
        self.discovery_mode = DiscoveryMode::RequestResponse;
        self
    }

    /// Sweep period for the directory: half the timeout, so staleness
    /// stays bounded well below the timeout itself
    pub fn sweep_interval_ms(&self) -> u64 {
        (self.service_timeout_ms / 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_intervals() {
        let config = NodeConfig::default();
        assert_eq!(config.sensor_read_interval_ms, 60_000);
        assert_eq!(config.discovery_interval_ms, 300_000);
        assert_eq!(config.service_timeout_ms, 900_000);
        assert_eq!(config.discovery_mode, DiscoveryMode::Broadcast);
    }

    #[test]
    fn test_builder_chain() {
        let config = NodeConfig::with_role(Role::Aggregator)
            .service_id(7)
            .target(0xBEEF)
            .request_response();
        assert_eq!(config.role, Role::Aggregator);
        assert_eq!(config.service_id, 7);
        assert_eq!(config.target_node_id, 0xBEEF);
        assert_eq!(config.discovery_mode, DiscoveryMode::RequestResponse);
    }

    #[test]
    fn test_sweep_interval_is_half_timeout() {
        let config = NodeConfig::default();
        assert_eq!(config.sweep_interval_ms(), 450_000);
    }
}
