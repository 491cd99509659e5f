//! Generated protobuf bindings for the vendored OSM PBF schema
//! (`proto/fileformat.proto`, `proto/osmformat.proto`), produced by
//! `build.rs` via `prost-build`.

#![allow(clippy::all)]

include!(concat!(env!("OUT_DIR"), "/OSMPBF.rs"));
