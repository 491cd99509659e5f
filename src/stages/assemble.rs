//! `build-derived-pbf`: joins the segment store and the extract caches
//! into the final derived PBF.

use std::path::Path;

use crate::error::{PipelineError, PipelineResult, ValidationError};
use crate::skip::SkipCounters;
use crate::stages::{check_outputs, StageStatus};

/// Result of running the assemble stage.
#[derive(Debug, Clone, Copy)]
pub enum AssembleOutcome {
    /// `out_path` already existed and `force` was not set.
    Skipped,
    /// Assembly ran to completion; carries the accumulated skip counts.
    Completed(SkipCounters),
}

/// Runs `build-derived-pbf --segments <rseg> --cache <cache-dir> --out
/// <pbf> [--include-barrier-edges] [--force]`.
pub fn run_assemble_stage(
    segments_path: &Path,
    cache_dir: &Path,
    out_path: &Path,
    include_barriers: bool,
    force: bool,
) -> PipelineResult<AssembleOutcome> {
    if !segments_path.exists() {
        return Err(PipelineError::Validation(ValidationError::MissingPath { path: segments_path.to_path_buf() }));
    }
    if !cache_dir.exists() || !cache_dir.is_dir() {
        return Err(PipelineError::Validation(ValidationError::NotAFile { path: cache_dir.to_path_buf() }));
    }
    if check_outputs(&[out_path]) == StageStatus::Complete && !force {
        eprintln!("assemble: {} already exists, skipping (pass --force to overwrite)", out_path.display());
        return Ok(AssembleOutcome::Skipped);
    }

    let temp_dir = out_path.parent().unwrap_or_else(|| Path::new("."));
    let timestamp = chrono::Utc::now().timestamp();

    let skip = crate::assemble::assemble(segments_path, cache_dir, out_path, temp_dir, include_barriers, timestamp)?;

    eprintln!("assemble: wrote {}; {}", out_path.display(), skip);
    Ok(AssembleOutcome::Completed(skip))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_segments_path_is_validation_error() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        let err = run_assemble_stage(
            &dir.path().join("missing.rseg"),
            &cache_dir,
            &dir.path().join("out.pbf"),
            false,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(ValidationError::MissingPath { .. })));
    }

    #[test]
    fn test_skips_when_output_exists_without_force() {
        let dir = tempdir().unwrap();
        let segments_path = dir.path().join("segs.rseg");
        std::fs::write(&segments_path, b"x").unwrap();
        let cache_dir = dir.path().join("cache");
        std::fs::create_dir_all(&cache_dir).unwrap();
        let out_path = dir.path().join("out.pbf");
        std::fs::write(&out_path, b"x").unwrap();

        let outcome = run_assemble_stage(&segments_path, &cache_dir, &out_path, false, false).unwrap();
        assert!(matches!(outcome, AssembleOutcome::Skipped));
    }
}
