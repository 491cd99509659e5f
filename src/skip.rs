//! Running counters for data-inconsistency conditions.
//!
//! Per the pipeline's error handling design, a way or node referenced by
//! the segment store but missing from a cache is not fatal: it is logged
//! at warning level via `eprintln!` and tallied here so the final stage
//! summary reports how much was dropped.

use std::fmt;

/// Counts of skipped entities accumulated over a single stage run.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipCounters {
    /// Ways referenced by the segment store with no entry in the way-tag
    /// cache.
    pub ways_missing_tags: u64,
    /// Nodes referenced by a way with no entry in the node cache.
    pub nodes_missing_coords: u64,
    /// Segment-store records skipped because the base way has no
    /// `highway` tag.
    pub non_highway_ways: u64,
}

impl SkipCounters {
    /// Records a way whose tags could not be found in the way-tag cache.
    pub fn note_missing_way_tags(&mut self, way_id: i64) {
        self.ways_missing_tags += 1;
        eprintln!("assemble: way {way_id} missing from way-tag cache, skipping");
    }

    /// Records a node whose coordinates could not be found in the node
    /// cache.
    pub fn note_missing_node(&mut self, node_id: i64) {
        self.nodes_missing_coords += 1;
        eprintln!("assemble: node {node_id} missing from node cache, skipping");
    }

    /// Records a segment-store record whose base way is not highway-tagged.
    pub fn note_non_highway(&mut self) {
        self.non_highway_ways += 1;
    }

    /// Total number of skipped entities across all categories.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.ways_missing_tags + self.nodes_missing_coords + self.non_highway_ways
    }
}

impl fmt::Display for SkipCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} way(s) missing tags, {} node(s) missing coords, {} non-highway record(s)",
            self.ways_missing_tags, self.nodes_missing_coords, self.non_highway_ways
        )
    }
}
