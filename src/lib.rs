//! # osmseg
//!
//! `osmseg` takes an OSM PBF extract and a stream of routing-graph edges
//! produced by an external segmentation pass, and turns those edges into
//! first-class OSM ways in a derived PBF: every edge becomes a `WAY` with
//! its own id, the original ways' tags carried over, and any route
//! relations that referenced the original ways rewritten to reference the
//! new edge ways in order.
//!
//! ## Pipeline stages
//!
//! 1. **capture** – drive an external [`capture::SegmentProducer`] over the
//!    source PBF, recording one [`segment_store::SegmentRecord`] per
//!    produced edge into a segment store (SS).
//! 2. **extract** – read the SS plus the source PBF once each to build the
//!    node cache ([`node_cache`]), way-tag cache ([`way_tag_cache`]), and
//!    relation cache ([`relation_cache`]).
//! 3. **assemble** – combine the SS and the three caches into a derived
//!    PBF ([`assemble`]), rewriting route relations on the way
//!    ([`rewriter`]).
//!
//! Data inconsistencies encountered along the way (a missing node, a way
//! with no cached tags) are not treated as failures; see [`skip`].

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod skip;

pub mod capture;
pub mod idset;
pub mod assemble;
pub mod cli;
pub mod config;
pub mod node_cache;
pub mod pbf_io;
pub mod relation_cache;
pub mod rewriter;
pub mod segment_store;
pub mod stages;
pub mod way_tag_cache;

pub use error::{FormatError, IntegrationError, PipelineError, PipelineResult, ValidationError};
pub use skip::SkipCounters;
