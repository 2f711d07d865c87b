//! Decoding of sensor capability records.
//!
//! A record has three `;`-separated segments, each `key:value`:
//!
//! ```text
//! r:1,2;w:3,;p:status
//! ```
//!
//! The first two segments are comma-separated capability tokens (reads,
//! writes), the third is the sensor's report key.

use crate::roster::types::{Capability, CapabilityMap, CapabilitySet, CapabilitySlot, SensorId};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors produced while decoding a single record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("malformed capability record {record:?}: {reason}")]
    MalformedRecord { record: String, reason: String },
}

impl CodecError {
    fn malformed(record: &str, reason: impl Into<String>) -> Self {
        CodecError::MalformedRecord {
            record: record.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result of decoding a whole roster.
#[derive(Debug, Clone, Default)]
pub struct DecodedRoster {
    /// Successfully decoded sensors
    pub sensors: CapabilityMap,
    /// Registered sensors whose record could not be decoded
    pub rejected: Vec<(SensorId, CodecError)>,
    /// Record entries for sensors that are not registered
    pub unknown: Vec<SensorId>,
    /// Registered sensors with no capability record
    pub unconfigured: Vec<SensorId>,
}

/// Decode one capability record against the capability table.
pub fn decode_record(
    raw: &str,
    table: &HashMap<String, String>,
) -> Result<CapabilitySet, CodecError> {
    let segments: Vec<&str> = raw.split(';').collect();
    if segments.len() != 3 {
        return Err(CodecError::malformed(
            raw,
            format!("expected 3 segments, found {}", segments.len()),
        ));
    }

    let (_, reads) = split_segment(raw, segments[0])?;
    let (_, writes) = split_segment(raw, segments[1])?;
    let (_, report_key) = split_segment(raw, segments[2])?;

    Ok(CapabilitySet {
        reads: resolve_tokens(reads, table),
        writes: resolve_tokens(writes, table),
        report_key: report_key.to_string(),
    })
}

/// Decode every record of registered sensors.
///
/// Records for unregistered sensors and malformed records are logged and
/// skipped; they never prevent other sensors from being decoded.
pub fn decode_roster(
    records: &HashMap<String, String>,
    known_sensors: &HashSet<String>,
    table: &HashMap<String, String>,
) -> DecodedRoster {
    let mut decoded = DecodedRoster::default();

    // Sorted so that logging and rejection order are stable.
    let mut ids: Vec<&String> = records.keys().collect();
    ids.sort();

    for id in ids {
        if !known_sensors.contains(id) {
            tracing::warn!(sensor = %id, "capability record for unregistered sensor, ignoring");
            decoded.unknown.push(id.clone());
            continue;
        }

        match decode_record(&records[id], table) {
            Ok(set) => {
                decoded.sensors.insert(id.clone(), set);
            }
            Err(e) => {
                tracing::error!(sensor = %id, error = %e, "skipping sensor");
                decoded.rejected.push((id.clone(), e));
            }
        }
    }

    let mut missing: Vec<SensorId> = known_sensors
        .iter()
        .filter(|id| !records.contains_key(*id))
        .cloned()
        .collect();
    missing.sort();
    for id in &missing {
        tracing::warn!(sensor = %id, "registered sensor has no capability record");
    }
    decoded.unconfigured = missing;

    decoded
}

fn split_segment<'a>(raw: &str, segment: &'a str) -> Result<(&'a str, &'a str), CodecError> {
    let mut parts = segment.split(':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => Ok((key, value)),
        _ => Err(CodecError::malformed(
            raw,
            format!("segment {segment:?} is not key:value"),
        )),
    }
}

fn resolve_tokens(list: &str, table: &HashMap<String, String>) -> Vec<CapabilitySlot> {
    list.split(',')
        .map(|token| match table.get(token) {
            Some(name) => CapabilitySlot::Known(Capability::new(token, name.clone())),
            None => CapabilitySlot::Absent(token.to_string()),
        })
        .collect()
}
