//! Capability and roster types for the sensor monitor.
//!
//! These types are built once per partition cycle from the store's roster
//! hashes and are never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a registered sensor.
pub type SensorId = String;

/// A resolved capability: the raw token from the sensor record plus the
/// descriptor it maps to in the capability table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    /// Token as written in the sensor's capability record
    pub token: String,
    /// Human-readable descriptor; also names the sensor's activity log
    pub name: String,
}

impl Capability {
    pub fn new(token: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            name: name.into(),
        }
    }
}

/// One position in a read or write capability list.
///
/// Lists are allowed to be sparse, so a token that is missing from the
/// capability table is kept as `Absent` instead of failing the record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilitySlot {
    Known(Capability),
    /// Raw token that did not resolve (may be empty)
    Absent(String),
}

impl CapabilitySlot {
    /// The resolved capability, if any.
    pub fn known(&self) -> Option<&Capability> {
        match self {
            CapabilitySlot::Known(cap) => Some(cap),
            CapabilitySlot::Absent(_) => None,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, CapabilitySlot::Absent(_))
    }
}

/// Decoded capability record of a single sensor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    /// Read capabilities, in record order
    pub reads: Vec<CapabilitySlot>,
    /// Write capabilities, in record order
    pub writes: Vec<CapabilitySlot>,
    /// Key the sensor reports under
    pub report_key: String,
}

impl CapabilitySet {
    /// Iterate over every resolved capability, reads first, then writes.
    pub fn known(&self) -> impl Iterator<Item = &Capability> {
        self.reads
            .iter()
            .chain(self.writes.iter())
            .filter_map(CapabilitySlot::known)
    }

    /// Number of resolved capabilities across reads and writes.
    pub fn known_count(&self) -> usize {
        self.known().count()
    }
}

/// Sensor id to decoded capabilities, iterated in sensor id order.
pub type CapabilityMap = BTreeMap<SensorId, CapabilitySet>;

/// A contiguous slice of the capability map owned by exactly one poller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SensorChunk {
    sensors: Vec<(SensorId, CapabilitySet)>,
}

impl SensorChunk {
    pub fn new(sensors: Vec<(SensorId, CapabilitySet)>) -> Self {
        Self { sensors }
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Sensors in this chunk, in their fixed iteration order.
    pub fn sensors(&self) -> &[(SensorId, CapabilitySet)] {
        &self.sensors
    }

    /// Sensor ids in this chunk, in their fixed iteration order.
    pub fn sensor_ids(&self) -> Vec<SensorId> {
        self.sensors.iter().map(|(id, _)| id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> CapabilitySet {
        CapabilitySet {
            reads: vec![
                CapabilitySlot::Known(Capability::new("1", "temp")),
                CapabilitySlot::Absent("9".to_string()),
            ],
            writes: vec![CapabilitySlot::Known(Capability::new("3", "valve"))],
            report_key: "status".to_string(),
        }
    }

    #[test]
    fn test_known_skips_absent_slots() {
        let binding = set();
        let names: Vec<&str> = binding.known().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["temp", "valve"]);
    }

    #[test]
    fn test_known_count() {
        assert_eq!(set().known_count(), 2);

        let empty = CapabilitySet {
            reads: vec![CapabilitySlot::Absent(String::new())],
            writes: vec![],
            report_key: "p".to_string(),
        };
        assert_eq!(empty.known_count(), 0);
    }

    #[test]
    fn test_chunk_ids() {
        let chunk = SensorChunk::new(vec![("a".to_string(), set()), ("b".to_string(), set())]);
        assert_eq!(chunk.sensor_ids(), vec!["a", "b"]);
        assert_eq!(chunk.len(), 2);
        assert!(!chunk.is_empty());
    }
}
