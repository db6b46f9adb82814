//! Protocol definitions for citymesh
//!
//! This module defines the core types carried over the mesh:
//! - Node roles and the broadcast sentinel
//! - The Discovery and SensorData payloads
//! - The Envelope tagged union and its wire tags

use std::collections::BTreeMap;
use std::fmt;

/// Node identity assigned by the underlying mesh transport
pub type NodeId = u32;

/// Broadcast destination sentinel understood by the transport
pub const BROADCAST_ADDR: NodeId = 0xFFFF_FFFF;

/// Application port number used for citymesh traffic
pub const APP_PORT: u8 = 0x41;

/// Maximum sensor id length on the wire
pub const MAX_SENSOR_ID_LEN: usize = 32;

/// Maximum reading key length (one-byte length prefix)
pub const MAX_KEY_LEN: usize = 255;

/// Wire tag for a Discovery envelope
pub const TAG_DISCOVERY: u8 = 0x01;

/// Wire tag for a SensorData envelope
pub const TAG_SENSOR_DATA: u8 = 0x02;

/// Configured behavior class of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Role {
    /// Role not advertised or not yet configured
    #[default]
    Unknown = 0,
    /// Produces readings
    Sensor = 1,
    /// Relays readings toward a gateway
    Aggregator = 2,
    /// Bridges readings to the external broker
    Gateway = 3,
}

impl Role {
    /// Convert from the wire byte
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Role::Unknown),
            1 => Some(Role::Sensor),
            2 => Some(Role::Aggregator),
            3 => Some(Role::Gateway),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Unknown => write!(f, "UNKNOWN"),
            Role::Sensor => write!(f, "SENSOR"),
            Role::Aggregator => write!(f, "AGGREGATOR"),
            Role::Gateway => write!(f, "GATEWAY"),
        }
    }
}

/// Service discovery announcement
///
/// In broadcast mode only `role` and `service_id` are meaningful.
/// In request/response mode the `request` flag asks peers to reply
/// unicast with their own advertisement carrying the `response` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Discovery {
    /// Advertised role of the sender
    pub role: Role,
    /// Advertised service group id (0 = no service offered)
    pub service_id: u32,
    /// Sender is soliciting replies
    pub request: bool,
    /// This advertisement answers a request
    pub response: bool,
}

impl Discovery {
    /// A plain periodic advertisement
    pub fn announce(role: Role, service_id: u32) -> Self {
        Self {
            role,
            service_id,
            request: false,
            response: false,
        }
    }

    /// A solicitation for unicast replies
    pub fn request(role: Role, service_id: u32) -> Self {
        Self {
            role,
            service_id,
            request: true,
            response: false,
        }
    }

    /// A unicast reply to a request
    pub fn response(role: Role, service_id: u32) -> Self {
        Self {
            role,
            service_id,
            request: false,
            response: true,
        }
    }
}

/// A set of named readings produced by one sensor pass
pub type ReadingSet = BTreeMap<String, f32>;

/// One batch of sensor readings
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorData {
    /// Sensor instance identifier (e.g. "BME280-Floor1"), at most
    /// [`MAX_SENSOR_ID_LEN`] bytes; may be empty
    pub sensor_id: String,
    /// UTC timestamp of the reading, seconds
    pub timestamp_utc: u64,
    /// Per-sender counter; wraps modulo 2^32
    pub sequence_num: u32,
    /// Key/value readings; may be empty
    pub readings: ReadingSet,
}

impl SensorData {
    /// Create a batch with no readings
    pub fn new(sensor_id: impl Into<String>, timestamp_utc: u64, sequence_num: u32) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            timestamp_utc,
            sequence_num,
            readings: ReadingSet::new(),
        }
    }

    /// Add a reading, replacing any previous value for the key
    pub fn with_reading(mut self, key: impl Into<String>, value: f32) -> Self {
        self.readings.insert(key.into(), value);
        self
    }
}

/// The tagged-union wire message
///
/// Exactly one variant is active at a time; the wire format carries
/// the variant tag in the first byte.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Service discovery announcement or solicitation
    Discovery(Discovery),
    /// Sensor reading batch
    SensorData(SensorData),
}

impl Envelope {
    /// Wire tag byte for this variant
    pub fn tag(&self) -> u8 {
        match self {
            Envelope::Discovery(_) => TAG_DISCOVERY,
            Envelope::SensorData(_) => TAG_SENSOR_DATA,
        }
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Discovery(d) => write!(
                f,
                "Discovery(role={}, service={}, req={}, resp={})",
                d.role, d.service_id, d.request, d.response
            ),
            Envelope::SensorData(s) => write!(
                f,
                "SensorData(id={:?}, seq={}, readings={})",
                s.sensor_id,
                s.sequence_num,
                s.readings.len()
            ),
        }
    }
}
