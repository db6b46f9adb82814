// Citymesh Gateway - Durable store-and-forward uplink
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Uplink topic and payload construction
//!
//! Topic layout: `{base}/sensor/{service_id}/{origin-hex}` with the
//! sensor id appended as a final segment when the reading carries
//! one. The payload is a flat JSON object so downstream consumers
//! need no knowledge of the mesh wire format.

use citymesh::{NodeId, ReadingSet, SensorData};
use serde::Serialize;

/// JSON shape published to the backhaul
#[derive(Debug, Serialize)]
struct UplinkPayload<'a> {
    node_id: NodeId,
    sensor_id: &'a str,
    timestamp_utc: u64,
    sequence_num: u32,
    readings: &'a ReadingSet,
}

/// Build the topic for one reading
///
/// The origin is rendered as fixed-width lowercase hex so topic
/// subscriptions can pattern-match on it.
pub fn topic_for(base: &str, service_id: u32, origin: NodeId, sensor_id: &str) -> String {
    if sensor_id.is_empty() {
        format!("{}/sensor/{}/{:08x}", base, service_id, origin)
    } else {
        format!("{}/sensor/{}/{:08x}/{}", base, service_id, origin, sensor_id)
    }
}

/// Serialize one sensor-data message as the uplink JSON payload
pub fn payload_json(origin: NodeId, data: &SensorData) -> serde_json::Result<String> {
    serde_json::to_string(&UplinkPayload {
        node_id: origin,
        sensor_id: &data.sensor_id,
        timestamp_utc: data.timestamp_utc,
        sequence_num: data.sequence_num,
        readings: &data.readings,
    })
}
