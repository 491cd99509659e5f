//! Command-line surface: `capture-segments`, `extract-osm`,
//! `build-derived-pbf`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::PipelineResult;
use crate::stages::{self, AssembleOutcome, CaptureOutcome, ExtractOutcome};

/// OSM PBF segmentation pipeline: turns routing-graph edges into
/// first-class OSM ways in a derived PBF.
#[derive(Debug, Parser)]
#[command(name = "osmseg", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Drive a segment producer over the source PBF, recording one
    /// segment-store record per produced edge.
    CaptureSegments {
        /// Source OSM PBF extract.
        #[arg(long)]
        osm: PathBuf,
        /// Segment store to write.
        #[arg(long)]
        segments: PathBuf,
        /// Overwrite `segments` if it already exists.
        #[arg(long)]
        force: bool,
    },

    /// Build the node, way-tag, and relation caches from the source PBF
    /// and the segment store.
    ExtractOsm {
        /// Source OSM PBF extract.
        #[arg(long)]
        osm: PathBuf,
        /// Segment store to read.
        #[arg(long)]
        segments: PathBuf,
        /// Directory to write the caches into.
        #[arg(long)]
        out: PathBuf,
        /// Use the binary, memory-mapped cache format instead of text.
        #[arg(long)]
        optimized: bool,
        /// Run a sampling pre-pass to build a frequency-ordered tag
        /// dictionary before writing the way-tag cache.
        #[arg(long)]
        build_dictionary: bool,
        /// Overwrite existing cache outputs.
        #[arg(long)]
        force: bool,
    },

    /// Join the segment store and the caches into a derived PBF.
    BuildDerivedPbf {
        /// Segment store to read.
        #[arg(long)]
        segments: PathBuf,
        /// Directory holding the extract caches.
        #[arg(long)]
        cache: PathBuf,
        /// Derived PBF to write.
        #[arg(long)]
        out: PathBuf,
        /// Emit edges flagged as barriers too (default: excluded).
        #[arg(long)]
        include_barrier_edges: bool,
        /// Overwrite `out` if it already exists.
        #[arg(long)]
        force: bool,
    },
}

/// Parses `std::env::args()` and runs the selected subcommand.
pub fn run() -> PipelineResult<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::CaptureSegments { osm, segments, force } => {
            match stages::run_capture_stage(&osm, &segments, force)? {
                CaptureOutcome::Skipped => {}
                CaptureOutcome::Completed { segments_written } => {
                    println!("captured {segments_written} segment(s)");
                }
            }
        }
        Command::ExtractOsm { osm, segments, out, optimized, build_dictionary, force } => {
            match stages::run_extract_stage(&osm, &segments, &out, optimized, build_dictionary, force)? {
                ExtractOutcome::Skipped => {}
                ExtractOutcome::Completed(report) => {
                    println!(
                        "cached {} node(s), {} way(s), {} relation(s)",
                        report.nodes_cached, report.ways_cached, report.relations_cached
                    );
                }
            }
        }
        Command::BuildDerivedPbf { segments, cache, out, include_barrier_edges, force } => {
            match stages::run_assemble_stage(&segments, &cache, &out, include_barrier_edges, force)? {
                AssembleOutcome::Skipped => {}
                AssembleOutcome::Completed(skip) => {
                    println!("wrote {}; {skip}", out.display());
                }
            }
        }
    }
    Ok(())
}
