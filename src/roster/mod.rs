//! Sensor roster handling.
//!
//! This module turns the raw roster hashes read from the store into a
//! capability map and splits it into per-poller chunks.

pub mod codec;
pub mod partition;
pub mod types;

// Re-export commonly used types
pub use codec::{decode_record, decode_roster, CodecError, DecodedRoster};
pub use partition::{partition, PartitionPlan};
pub use types::{Capability, CapabilityMap, CapabilitySet, CapabilitySlot, SensorChunk, SensorId};
