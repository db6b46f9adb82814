//! Service discovery directory
//!
//! Tracks which peers advertised which role and service group, and
//! how fresh that advertisement is. Entries are ephemeral: rebuilt
//! purely from traffic, never persisted.

use crate::protocol::{NodeId, Role};
use log::{debug, info};
use std::collections::BTreeMap;

/// Last-known advertisement from one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Advertised role
    pub role: Role,
    /// Advertised service group id
    pub service_id: u32,
    /// Monotonic timestamp of the latest advertisement, milliseconds
    pub last_seen: u64,
}

/// Directory of discovered peers
///
/// Keys are unique node ids; the local node's own id is filtered at
/// insert time and never appears. Lookups are O(n) over the table,
/// which is acceptable at mesh scale (tens of peers).
#[derive(Debug)]
pub struct ServiceDirectory {
    local_id: NodeId,
    records: BTreeMap<NodeId, ServiceRecord>,
}

impl ServiceDirectory {
    /// Create an empty directory for the node with the given id
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            records: BTreeMap::new(),
        }
    }

    /// Insert or refresh the record for a peer
    ///
    /// The latest advertisement wins unconditionally; there is no
    /// merging with the previous record. Advertisements from the
    /// local node are ignored. Returns true when a record was
    /// created or replaced.
    pub fn upsert(&mut self, node: NodeId, role: Role, service_id: u32, now: u64) -> bool {
        if node == self.local_id {
            return false;
        }

        let record = ServiceRecord {
            role,
            service_id,
            last_seen: now,
        };
        let previous = self.records.insert(node, record);
        match previous {
            Some(_) => debug!(
                "directory: refreshed 0x{:08x} role={} service={}",
                node, role, service_id
            ),
            None => info!(
                "directory: discovered 0x{:08x} role={} service={}",
                node, role, service_id
            ),
        }
        true
    }

    /// Remove every record older than `timeout_ms`, returning the count
    ///
    /// Callers run this on a fixed period shorter than the timeout so
    /// staleness stays bounded.
    pub fn evict_expired(&mut self, now: u64, timeout_ms: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|node, record| {
            let fresh = now.saturating_sub(record.last_seen) <= timeout_ms;
            if !fresh {
                info!("directory: evicting 0x{:08x}, last seen {}ms ago", node, now - record.last_seen);
            }
            fresh
        });
        before - self.records.len()
    }

    /// Best known gateway: the Gateway-role record seen most recently
    ///
    /// Ties on `last_seen` resolve to the first record encountered in
    /// ascending node-id order, which is deterministic. Returns None
    /// when no gateway is known.
    pub fn find_best_gateway(&self) -> Option<NodeId> {
        let mut best: Option<(NodeId, u64)> = None;
        for (&node, record) in &self.records {
            if record.role != Role::Gateway {
                continue;
            }
            match best {
                Some((_, seen)) if record.last_seen <= seen => {}
                _ => best = Some((node, record.last_seen)),
            }
        }
        best.map(|(node, _)| node)
    }

    /// Look up the record for a peer
    pub fn get(&self, node: NodeId) -> Option<&ServiceRecord> {
        self.records.get(&node)
    }

    /// Number of known peers
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no peers are known
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over all records in ascending node-id order
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &ServiceRecord)> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: NodeId = 0x1000;

    #[test]
    fn test_upsert_and_get() {
        let mut dir = ServiceDirectory::new(LOCAL);
        assert!(dir.upsert(0xA, Role::Sensor, 1, 100));
        let record = dir.get(0xA).unwrap();
        assert_eq!(record.role, Role::Sensor);
        assert_eq!(record.service_id, 1);
        assert_eq!(record.last_seen, 100);
    }

    #[test]
    fn test_upsert_replaces_not_merges() {
        let mut dir = ServiceDirectory::new(LOCAL);
        dir.upsert(0xA, Role::Sensor, 1, 100);
        dir.upsert(0xA, Role::Gateway, 9, 200);

        assert_eq!(dir.len(), 1);
        let record = dir.get(0xA).unwrap();
        assert_eq!(record.role, Role::Gateway);
        assert_eq!(record.service_id, 9);
        assert_eq!(record.last_seen, 200);
    }

    #[test]
    fn test_self_id_never_inserted() {
        let mut dir = ServiceDirectory::new(LOCAL);
        assert!(!dir.upsert(LOCAL, Role::Gateway, 1, 100));
        assert!(dir.is_empty());
        assert!(dir.get(LOCAL).is_none());
    }

    #[test]
    fn test_evict_expired() {
        let mut dir = ServiceDirectory::new(LOCAL);
        dir.upsert(0xA, Role::Sensor, 1, 100);
        dir.upsert(0xB, Role::Gateway, 1, 500);

        let removed = dir.evict_expired(1100, 900);
        assert_eq!(removed, 1);
        assert!(dir.get(0xA).is_none());
        assert!(dir.get(0xB).is_some());
    }

    #[test]
    fn test_evict_keeps_exact_age() {
        let mut dir = ServiceDirectory::new(LOCAL);
        dir.upsert(0xA, Role::Sensor, 1, 100);
        // Age exactly equal to the timeout is still fresh.
        assert_eq!(dir.evict_expired(1000, 900), 0);
        assert_eq!(dir.evict_expired(1001, 900), 1);
    }

    #[test]
    fn test_find_best_gateway_none() {
        let mut dir = ServiceDirectory::new(LOCAL);
        assert_eq!(dir.find_best_gateway(), None);
        dir.upsert(0xA, Role::Aggregator, 1, 100);
        assert_eq!(dir.find_best_gateway(), None);
    }

    #[test]
    fn test_find_best_gateway_most_recent_wins() {
        let mut dir = ServiceDirectory::new(LOCAL);
        dir.upsert(0xA, Role::Gateway, 1, 100);
        dir.upsert(0xB, Role::Gateway, 1, 300);
        dir.upsert(0xC, Role::Sensor, 1, 999);
        assert_eq!(dir.find_best_gateway(), Some(0xB));
    }

    #[test]
    fn test_find_best_gateway_tie_is_deterministic() {
        let mut dir = ServiceDirectory::new(LOCAL);
        dir.upsert(0xB, Role::Gateway, 1, 100);
        dir.upsert(0xA, Role::Gateway, 1, 100);
        // First encountered in iteration order (ascending node id).
        assert_eq!(dir.find_best_gateway(), Some(0xA));
    }

    #[test]
    fn test_refresh_changes_best_gateway() {
        let mut dir = ServiceDirectory::new(LOCAL);
        dir.upsert(0xA, Role::Gateway, 1, 100);
        dir.upsert(0xB, Role::Gateway, 1, 200);
        assert_eq!(dir.find_best_gateway(), Some(0xB));
        dir.upsert(0xA, Role::Gateway, 1, 300);
        assert_eq!(dir.find_best_gateway(), Some(0xA));
    }
}
