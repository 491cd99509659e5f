//! The capture stage: drives an external segment producer over a source
//! PBF and records each produced segment into a segment store.
//!
//! The producer is assumed to emit two calls per segment, in strict
//! 1:1 order: [`SegmentProducer::pre`] with the segment's content before it
//! has an id, then [`SegmentProducer::commit`] once the edge is
//! materialized. `CaptureDriver` is the FIFO that turns that pairing into
//! [`SegmentRecord`]s with assigned edge ids.

use std::collections::VecDeque;

use crate::error::{IntegrationError, PipelineError, PipelineResult};
use crate::segment_store::{SegmentRecord, SegmentWriter};

/// One segment as reported by the producer, before it has been assigned
/// an edge id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSegment {
    /// Original OSM way this segment was cut from.
    pub base_way_id: i64,
    /// Ordered original OSM node ids in this segment.
    pub node_refs: Vec<i64>,
    /// Zero-based index within the base way's dense segment sequence.
    pub seg_index: u32,
    /// Whether the producer flagged this as a barrier edge.
    pub is_barrier: bool,
}

/// The external segment producer contract: an opaque stream of
/// `(base_way_id, node_refs, seg_index, is_barrier)` tuples, each reported
/// via a `pre`/`commit` pair in strict FIFO order.
///
/// Implementations are expected to drive [`CaptureDriver::pre`] and
/// [`CaptureDriver::commit`] themselves as they walk their own internal
/// state; this trait exists so [`drive`] can host a reference producer for
/// tests and small inputs without committing the core to any particular
/// way-splitting algorithm.
pub trait SegmentProducer {
    /// Runs the producer to completion, calling `pre` then `commit` on
    /// `driver` for every segment it produces.
    fn run(&mut self, driver: &mut CaptureDriver) -> PipelineResult<()>;
}

/// Turns paired `pre`/`commit` callbacks into assigned, written
/// [`SegmentRecord`]s.
pub struct CaptureDriver<'w> {
    writer: &'w mut SegmentWriter,
    pending: VecDeque<PendingSegment>,
    next_edge_id: u32,
}

impl<'w> CaptureDriver<'w> {
    /// Creates a driver writing into `writer`, starting edge ids at 0.
    pub fn new(writer: &'w mut SegmentWriter) -> Self {
        Self {
            writer,
            pending: VecDeque::new(),
            next_edge_id: 0,
        }
    }

    /// Enqueues a segment the producer has described but not yet
    /// materialized.
    pub fn pre(&mut self, segment: PendingSegment) {
        self.pending.push_back(segment);
    }

    /// Pops the oldest pending segment, assigns it the next edge id, and
    /// writes it to the segment store.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrationError::CommitWithoutPre`] if nothing is
    /// pending, naming `base_way_id` as the diagnostic anchor (the FIFO is
    /// empty, so there is no segment to blame precisely; callers should
    /// treat this as a contract violation by the producer).
    pub fn commit(&mut self) -> PipelineResult<u32> {
        let Some(segment) = self.pending.pop_front() else {
            return Err(PipelineError::Integration(
                IntegrationError::CommitWithoutPre { base_way_id: -1 },
            ));
        };
        let edge_id = self.next_edge_id;
        self.next_edge_id += 1;

        let mut flags = 0u8;
        if segment.is_barrier {
            flags |= crate::segment_store::BARRIER_FLAG;
        }

        self.writer.write(&SegmentRecord {
            edge_id,
            base_way_id: segment.base_way_id,
            seg_index: segment.seg_index,
            flags,
            node_refs: segment.node_refs,
        })?;

        Ok(edge_id)
    }

    /// Must be called once the producer's stream has ended. Fails if any
    /// `pre` was never matched by a `commit`.
    pub fn finish(self) -> PipelineResult<u32> {
        if !self.pending.is_empty() {
            return Err(PipelineError::Integration(
                IntegrationError::PendingAtEndOfStream {
                    pending: self.pending.len(),
                },
            ));
        }
        Ok(self.next_edge_id)
    }
}

/// Runs `producer` to completion over `writer`, returning the number of
/// segments captured.
pub fn drive(writer: &mut SegmentWriter, producer: &mut impl SegmentProducer) -> PipelineResult<u32> {
    let mut driver = CaptureDriver::new(writer);
    producer.run(&mut driver)?;
    driver.finish()
}

/// A reference producer that turns each whole way into a single segment,
/// one per input way, never flagging barriers. Useful as a default for
/// small inputs and as a test fixture; real deployments plug in a proper
/// graph-edge splitter.
pub struct IdentityProducer<I> {
    ways: I,
}

impl<I> IdentityProducer<I>
where
    I: Iterator<Item = (i64, Vec<i64>)>,
{
    /// Creates a producer over `ways`, an iterator of
    /// `(way_id, ordered_node_ids)`.
    pub fn new(ways: I) -> Self {
        Self { ways }
    }
}

impl<I> SegmentProducer for IdentityProducer<I>
where
    I: Iterator<Item = (i64, Vec<i64>)>,
{
    fn run(&mut self, driver: &mut CaptureDriver) -> PipelineResult<()> {
        for (base_way_id, node_refs) in self.ways.by_ref() {
            driver.pre(PendingSegment {
                base_way_id,
                node_refs,
                seg_index: 0,
                is_barrier: false,
            });
            driver.commit()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_store::SegmentStoreReader;
    use tempfile::tempdir;

    #[test]
    fn test_single_way_two_segment_capture() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("capture.rseg");
        let mut writer = SegmentWriter::create(&path).unwrap();

        {
            let mut driver = CaptureDriver::new(&mut writer);
            driver.pre(PendingSegment {
                base_way_id: 100,
                node_refs: vec![1, 2, 3],
                seg_index: 0,
                is_barrier: false,
            });
            let first = driver.commit().unwrap();
            driver.pre(PendingSegment {
                base_way_id: 100,
                node_refs: vec![3, 4, 5, 6],
                seg_index: 1,
                is_barrier: false,
            });
            let second = driver.commit().unwrap();
            assert_eq!((first, second), (0, 1));
            driver.finish().unwrap();
        }
        writer.close().unwrap();

        let records: Vec<_> = SegmentStoreReader::open_streaming(&path)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].edge_id, 0);
        assert_eq!(records[1].edge_id, 1);
        assert_eq!(records[0].base_way_id, 100);
        assert_eq!(records[1].seg_index, 1);
    }

    #[test]
    fn test_commit_without_pre_is_integration_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.rseg");
        let mut writer = SegmentWriter::create(&path).unwrap();
        let mut driver = CaptureDriver::new(&mut writer);
        let err = driver.commit().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Integration(IntegrationError::CommitWithoutPre { .. })
        ));
    }

    #[test]
    fn test_pending_at_end_of_stream_is_integration_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pending.rseg");
        let mut writer = SegmentWriter::create(&path).unwrap();
        let mut driver = CaptureDriver::new(&mut writer);
        driver.pre(PendingSegment {
            base_way_id: 1,
            node_refs: vec![1, 2],
            seg_index: 0,
            is_barrier: false,
        });
        let err = driver.finish().unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Integration(IntegrationError::PendingAtEndOfStream { pending: 1 })
        ));
    }

    #[test]
    fn test_identity_producer_drives_one_segment_per_way() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("identity.rseg");
        let mut writer = SegmentWriter::create(&path).unwrap();
        let ways = vec![(10i64, vec![1i64, 2, 3]), (20, vec![4, 5])];
        let mut producer = IdentityProducer::new(ways.into_iter());
        let count = drive(&mut writer, &mut producer).unwrap();
        writer.close().unwrap();
        assert_eq!(count, 2);

        let records: Vec<_> = SegmentStoreReader::open_streaming(&path)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].base_way_id, 10);
        assert_eq!(records[1].base_way_id, 20);
    }
}
