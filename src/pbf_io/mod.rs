//! PBF reading and writing.
//!
//! The reader and writer are treated as external collaborators: the
//! reader produces a forward-only stream of typed OSM elements, the
//! writer accepts nodes, then ways, then relations, in that order. This
//! module hosts the concrete adapters this crate ships with — an
//! [`osmpbf`]-backed reader, and a from-scratch writer generated from the
//! vendored wire format in `proto/` — behind narrow traits so the rest of
//! the pipeline depends only on the interface.

mod generated;
mod reader;
mod writer;

use std::collections::HashMap;

pub use reader::OsmPbfSource;
pub use writer::OsmPbfWriter;

use crate::relation_cache::MemberType;

/// A node as produced by the reader, or consumed by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct PbfNode {
    /// OSM node id.
    pub id: i64,
    /// Latitude, degrees.
    pub lat: f64,
    /// Longitude, degrees.
    pub lon: f64,
    /// Tags, verbatim.
    pub tags: HashMap<String, String>,
}

/// A way as produced by the reader, or consumed by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct PbfWay {
    /// OSM way id (or edge id, for derived ways).
    pub id: i64,
    /// Ordered member node ids.
    pub node_refs: Vec<i64>,
    /// Tags, verbatim.
    pub tags: HashMap<String, String>,
}

/// A relation member as produced by the reader, or consumed by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct PbfRelationMember {
    /// The member's kind.
    pub member_type: MemberType,
    /// The referenced entity's id.
    pub member_id: i64,
    /// The member's role string.
    pub role: String,
}

/// A relation as produced by the reader, or consumed by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct PbfRelation {
    /// OSM relation id.
    pub id: i64,
    /// Tags, verbatim.
    pub tags: HashMap<String, String>,
    /// Members in order.
    pub members: Vec<PbfRelationMember>,
}

/// One element yielded by a [`PbfSource`].
#[derive(Debug, Clone, PartialEq)]
pub enum PbfElement {
    /// A node.
    Node(PbfNode),
    /// A way.
    Way(PbfWay),
    /// A relation.
    Relation(PbfRelation),
}

/// A forward-only stream of typed OSM elements. The only operation is a
/// single traversal; implementations need not support seeking or
/// replaying.
pub trait PbfSource {
    /// Invokes `visit` once per element in file order. Returns the first
    /// I/O error encountered, if any.
    fn for_each_element(
        &mut self,
        visit: &mut dyn FnMut(PbfElement) -> std::io::Result<()>,
    ) -> std::io::Result<()>;
}

/// Accepts OSM entities in nodes → ways → relations order and serializes
/// them to a PBF file on [`PbfSink::finish`].
pub trait PbfSink {
    /// Writes one node. Must be called before any way or relation.
    fn write_node(&mut self, node: &PbfNode) -> std::io::Result<()>;

    /// Writes one way. Must be called after all nodes, before any
    /// relation.
    fn write_way(&mut self, way: &PbfWay) -> std::io::Result<()>;

    /// Writes one relation. Must be called after all nodes and ways.
    fn write_relation(&mut self, relation: &PbfRelation) -> std::io::Result<()>;

    /// Flushes any buffered entities and finalizes the file.
    fn finish(self: Box<Self>) -> std::io::Result<()>;
}
