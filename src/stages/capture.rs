//! `capture-segments`: drives the segment producer over the source PBF.

use std::path::Path;

use crate::capture::{CaptureDriver, PendingSegment};
use crate::error::{PipelineError, PipelineResult, ValidationError};
use crate::pbf_io::{OsmPbfSource, PbfElement, PbfSource};
use crate::segment_store::SegmentWriter;

/// Result of running the capture stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// `segments_path` already existed and `force` was not set.
    Skipped,
    /// Capture ran; this many segments were written.
    Completed {
        /// Number of segments written to the store.
        segments_written: u32,
    },
}

/// Runs `capture-segments --osm <pbf> --segments <rseg> [--force]`.
///
/// Plugs in the reference identity producer (one segment per way, no
/// barriers) since the real graph-edge splitter is an external
/// collaborator outside this crate's scope; see
/// [`crate::capture::SegmentProducer`].
pub fn run_capture_stage(osm_path: &Path, segments_path: &Path, force: bool) -> PipelineResult<CaptureOutcome> {
    if !osm_path.exists() {
        return Err(PipelineError::Validation(ValidationError::MissingPath {
            path: osm_path.to_path_buf(),
        }));
    }
    if !osm_path.is_file() {
        return Err(PipelineError::Validation(ValidationError::NotAFile {
            path: osm_path.to_path_buf(),
        }));
    }
    if segments_path.exists() && !force {
        eprintln!("capture: {} already exists, skipping (pass --force to overwrite)", segments_path.display());
        return Ok(CaptureOutcome::Skipped);
    }

    let mut writer = SegmentWriter::create(segments_path)?;
    let segments_written = {
        let mut driver = CaptureDriver::new(&mut writer);
        let mut source = OsmPbfSource::open(osm_path)?;
        source.for_each_element(&mut |element| {
            if let PbfElement::Way(way) = element {
                if way.node_refs.len() < 2 {
                    return Ok(());
                }
                driver.pre(PendingSegment {
                    base_way_id: way.id,
                    node_refs: way.node_refs,
                    seg_index: 0,
                    is_barrier: false,
                });
                driver.commit().map_err(to_io_error)?;
            }
            Ok(())
        })?;
        driver.finish()?
    };
    writer.close()?;

    eprintln!("capture: wrote {segments_written} segment(s) to {}", segments_path.display());
    Ok(CaptureOutcome::Completed { segments_written })
}

fn to_io_error(err: PipelineError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_osm_path_is_validation_error() {
        let dir = tempdir().unwrap();
        let err = run_capture_stage(&dir.path().join("nope.pbf"), &dir.path().join("out.rseg"), false).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(ValidationError::MissingPath { .. })));
    }

    #[test]
    fn test_skips_when_segments_exist_without_force() {
        let dir = tempdir().unwrap();
        let osm_path = dir.path().join("in.pbf");
        std::fs::write(&osm_path, b"not a real pbf, just needs to exist").unwrap();
        let segments_path = dir.path().join("out.rseg");
        std::fs::write(&segments_path, b"placeholder").unwrap();

        let outcome = run_capture_stage(&osm_path, &segments_path, false).unwrap();
        assert_eq!(outcome, CaptureOutcome::Skipped);
    }
}
