//! Orchestration of the three pipeline subcommands. This is the only
//! layer allowed to know about file paths, `--force`, and
//! skip-if-exists semantics; the modules it drives (`capture`, `idset`,
//! `node_cache`, `way_tag_cache`, `relation_cache`, `rewriter`,
//! `assemble`, `pbf_io`) take their inputs and outputs by value or by
//! explicit path argument and know nothing about CLI flags.

mod capture;
mod extract;
mod assemble;

pub use capture::{run_capture_stage, CaptureOutcome};
pub use extract::{run_extract_stage, ExtractOutcome, ExtractReport};
pub use assemble::{run_assemble_stage, AssembleOutcome};

use std::path::Path;

/// Whether a stage's declared outputs are already present on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    /// All declared outputs exist.
    Complete,
    /// At least one declared output is missing.
    Incomplete,
}

/// Checks a stage's declared output paths, mirroring the way the
/// teacher's segment manager scans existing segment files at open time
/// to decide what already exists on disk.
#[must_use]
pub fn check_outputs(paths: &[&Path]) -> StageStatus {
    if paths.iter().all(|p| p.exists()) {
        StageStatus::Complete
    } else {
        StageStatus::Incomplete
    }
}
