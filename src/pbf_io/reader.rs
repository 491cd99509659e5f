//! [`PbfSource`] adapter over the `osmpbf` crate.

use std::io;
use std::path::Path;

use osmpbf::{Element, ElementReader, RelMemberType};

use super::{PbfElement, PbfNode, PbfRelation, PbfRelationMember, PbfSource, PbfWay};
use crate::relation_cache::MemberType;

/// Reads a `.osm.pbf` file via `osmpbf`, which owns decompression and
/// dense-node decoding; this adapter only reshapes its element types into
/// [`PbfElement`].
pub struct OsmPbfSource {
    reader: Option<ElementReader<std::io::BufReader<std::fs::File>>>,
}

impl OsmPbfSource {
    /// Opens `path` for forward-only reading.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let reader = ElementReader::from_path(path.as_ref())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        Ok(Self { reader: Some(reader) })
    }
}

impl PbfSource for OsmPbfSource {
    fn for_each_element(
        &mut self,
        visit: &mut dyn FnMut(PbfElement) -> io::Result<()>,
    ) -> io::Result<()> {
        let reader = self.reader.take().ok_or_else(|| {
            io::Error::new(io::ErrorKind::Other, "PBF source already consumed")
        })?;

        let mut first_error: Option<io::Error> = None;

        let outcome = reader.for_each(|element| {
            if first_error.is_some() {
                return;
            }
            let converted = convert(element);
            if let Err(e) = visit(converted) {
                first_error = Some(e);
            }
        });

        if let Some(e) = first_error {
            return Err(e);
        }
        outcome.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }
}

fn convert(element: Element) -> PbfElement {
    match element {
        Element::Node(node) => PbfElement::Node(PbfNode {
            id: node.id(),
            lat: node.lat(),
            lon: node.lon(),
            tags: node.tags().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }),
        Element::DenseNode(node) => PbfElement::Node(PbfNode {
            id: node.id(),
            lat: node.lat(),
            lon: node.lon(),
            tags: node.tags().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }),
        Element::Way(way) => PbfElement::Way(PbfWay {
            id: way.id(),
            node_refs: way.refs().collect(),
            tags: way.tags().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }),
        Element::Relation(relation) => PbfElement::Relation(PbfRelation {
            id: relation.id(),
            tags: relation
                .tags()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            members: relation
                .members()
                .map(|member| PbfRelationMember {
                    member_type: match member.member_type {
                        RelMemberType::Node => MemberType::Node,
                        RelMemberType::Way => MemberType::Way,
                        RelMemberType::Relation => MemberType::Relation,
                    },
                    member_id: member.member_id,
                    role: member.role().unwrap_or("").to_string(),
                })
                .collect(),
        }),
    }
}
