//! Splitting the capability map across a bounded pool of pollers.

use crate::roster::types::{CapabilityMap, SensorChunk};
use serde::Serialize;

/// Summary of a partition, for logging and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionPlan {
    /// Number of pollers (and chunks)
    pub workers: usize,
    /// Number of sensors across all chunks
    pub sensors: usize,
    /// Size of the largest chunk
    pub max_chunk: usize,
}

impl PartitionPlan {
    pub fn of(chunks: &[SensorChunk]) -> Self {
        Self {
            workers: chunks.len(),
            sensors: chunks.iter().map(SensorChunk::len).sum(),
            max_chunk: chunks.iter().map(SensorChunk::len).max().unwrap_or(0),
        }
    }
}

/// Partition `map` into `min(max_workers, map.len())` contiguous chunks.
///
/// Chunks follow the map's iteration order. The first `len % workers`
/// chunks hold `ceil(len / workers)` sensors and the rest one fewer, so
/// no chunk is empty and sizes differ by at most one. An empty map yields
/// no chunks. `max_workers == 0` is treated as 1.
pub fn partition(map: &CapabilityMap, max_workers: usize) -> Vec<SensorChunk> {
    let total = map.len();
    if total == 0 {
        return Vec::new();
    }

    let workers = max_workers.max(1).min(total);
    let base = total / workers;
    let larger = total % workers;

    let mut entries = map.iter().map(|(id, set)| (id.clone(), set.clone()));
    (0..workers)
        .map(|i| {
            let size = if i < larger { base + 1 } else { base };
            SensorChunk::new(entries.by_ref().take(size).collect())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::types::CapabilitySet;
    use std::collections::BTreeSet;

    fn map_of(n: usize) -> CapabilityMap {
        (0..n)
            .map(|i| {
                (
                    format!("sensor-{i:03}"),
                    CapabilitySet {
                        reads: vec![],
                        writes: vec![],
                        report_key: "status".to_string(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_empty_map_yields_no_chunks() {
        for workers in [0, 1, 8] {
            assert!(partition(&CapabilityMap::new(), workers).is_empty());
        }
    }

    #[test]
    fn test_chunk_invariants() {
        for n in 1..=30 {
            let map = map_of(n);
            for workers in 1..=12 {
                let chunks = partition(&map, workers);
                assert_eq!(chunks.len(), workers.min(n), "n={n} workers={workers}");

                let sizes: Vec<usize> = chunks.iter().map(SensorChunk::len).collect();
                let max = *sizes.iter().max().unwrap();
                let min = *sizes.iter().min().unwrap();
                assert!(min >= 1);
                assert!(max - min <= 1, "n={n} workers={workers} sizes={sizes:?}");
                assert_eq!(max, n.div_ceil(workers.min(n)));

                let ids: Vec<String> = chunks.iter().flat_map(|c| c.sensor_ids()).collect();
                let unique: BTreeSet<&String> = ids.iter().collect();
                assert_eq!(ids.len(), n);
                assert_eq!(unique.len(), n);
                assert_eq!(ids, map.keys().cloned().collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_fewer_sensors_than_workers() {
        let chunks = partition(&map_of(5), 8);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.len() == 1));
    }

    #[test]
    fn test_zero_workers_is_one() {
        let chunks = partition(&map_of(4), 0);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 4);
    }

    #[test]
    fn test_deterministic() {
        let map = map_of(17);
        assert_eq!(partition(&map, 4), partition(&map, 4));
    }

    #[test]
    fn test_plan() {
        let plan = PartitionPlan::of(&partition(&map_of(10), 4));
        assert_eq!(
            plan,
            PartitionPlan {
                workers: 4,
                sensors: 10,
                max_chunk: 3
            }
        );
    }
}
