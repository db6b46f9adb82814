//! Sensor capability
//!
//! Hardware drivers live outside the core; a sensor-role node only
//! depends on this capability pair: produce a reading set, name the
//! instance.

use crate::error::SensorError;
use crate::protocol::ReadingSet;
use std::collections::VecDeque;

/// Capability consumed by a sensor-role node
///
/// Implementations wrap a concrete driver (BME280, ADC bank, ...)
/// selected at construction; the core never sees the concrete type.
pub trait SensorRead {
    /// Read the hardware and return a fresh reading set
    fn read(&mut self) -> Result<ReadingSet, SensorError>;

    /// Identifier for this sensor instance (e.g. "BME280-Floor1");
    /// may be empty
    fn sensor_id(&self) -> &str;
}

/// Sensor that replays canned reading sets
///
/// Stands in for real hardware in tests and host-side simulations.
/// Once the script is exhausted every read fails, which exercises the
/// caller's error path.
#[derive(Debug, Default)]
pub struct ScriptedSensor {
    id: String,
    script: VecDeque<ReadingSet>,
}

impl ScriptedSensor {
    /// Create a sensor with the given id and no queued readings
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: VecDeque::new(),
        }
    }

    /// Queue one reading set to be returned by a future `read`
    pub fn push_reading_set(&mut self, readings: ReadingSet) {
        self.script.push_back(readings);
    }

    /// Number of reading sets still queued
    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl SensorRead for ScriptedSensor {
    fn read(&mut self) -> Result<ReadingSet, SensorError> {
        self.script
            .pop_front()
            .ok_or_else(|| SensorError::ReadFailed("script exhausted".to_string()))
    }

    fn sensor_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_sensor_replays_in_order() {
        let mut sensor = ScriptedSensor::new("dummy-1");
        let first: ReadingSet = [("t".to_string(), 1.0)].into_iter().collect();
        let second: ReadingSet = [("t".to_string(), 2.0)].into_iter().collect();
        sensor.push_reading_set(first.clone());
        sensor.push_reading_set(second.clone());

        assert_eq!(sensor.read().unwrap(), first);
        assert_eq!(sensor.read().unwrap(), second);
        assert_eq!(sensor.remaining(), 0);
    }

    #[test]
    fn test_scripted_sensor_exhausted_fails() {
        let mut sensor = ScriptedSensor::new("dummy-1");
        assert!(matches!(sensor.read(), Err(SensorError::ReadFailed(_))));
    }

    #[test]
    fn test_sensor_id() {
        let sensor = ScriptedSensor::new("BME280-Floor1");
        assert_eq!(sensor.sensor_id(), "BME280-Floor1");
    }
}
