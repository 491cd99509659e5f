//! [`PbfSink`] adapter writing the vendored OSM PBF wire format directly.
//!
//! Nothing in this pipeline reads its own output back, so entities are
//! written with the simpler non-dense `Node`/`Way`/`Relation` messages
//! rather than the delta/zigzag-packed `DenseNodes` encoding real OSM
//! extracts use for nodes.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use prost::Message;

use super::generated::{
    relation::MemberType as WireMemberType, Blob, BlobHeader, HeaderBlock, Info, Node,
    PrimitiveBlock, PrimitiveGroup, Relation, StringTable, Way,
};
use super::{PbfNode, PbfRelation, PbfSink, PbfWay};
use crate::relation_cache::MemberType;

/// Entities per flushed `PrimitiveBlock`. Real-world extracts use figures
/// in the low thousands; kept modest here since this writer never has to
/// share a process with a multi-GB reader.
const BATCH_SIZE: usize = 8_000;

const COORD_SCALE: f64 = 1e7;

fn encode_coord(value: f64) -> i64 {
    (value * COORD_SCALE).round() as i64
}

/// Delta-encodes a sequence of ids against the previous value (0 for the
/// first), as the PBF wire format requires for `Way.refs` and
/// `Relation.memids`.
fn delta_encode(values: &[i64]) -> Vec<i64> {
    let mut out = Vec::with_capacity(values.len());
    let mut prev = 0i64;
    for &value in values {
        out.push(value - prev);
        prev = value;
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Nodes,
    Ways,
    Relations,
    Done,
}

/// Builds one block's string table, deduplicating as entries are added.
struct StringTableBuilder {
    index_of: HashMap<String, i32>,
    strings: Vec<String>,
}

impl StringTableBuilder {
    fn new() -> Self {
        let mut builder = Self {
            index_of: HashMap::new(),
            strings: Vec::new(),
        };
        builder.intern("");
        builder
    }

    fn intern(&mut self, s: &str) -> i32 {
        if let Some(&index) = self.index_of.get(s) {
            return index;
        }
        let index = self.strings.len() as i32;
        self.strings.push(s.to_string());
        self.index_of.insert(s.to_string(), index);
        index
    }

    fn build(self) -> StringTable {
        StringTable {
            s: self.strings.into_iter().map(String::into_bytes).collect(),
        }
    }
}

fn synthetic_info(timestamp: i64, user_sid: i32) -> Info {
    Info {
        version: Some(1),
        timestamp: Some(timestamp),
        changeset: Some(1),
        uid: Some(0),
        user_sid: Some(user_sid as u32),
        visible: Some(true),
    }
}

/// Writes nodes, then ways, then relations to a `.osm.pbf` file, encoding
/// each call against the vendored wire format generated from `proto/`.
pub struct OsmPbfWriter {
    out: BufWriter<File>,
    phase: Phase,
    pending_nodes: Vec<PbfNode>,
    pending_ways: Vec<PbfWay>,
    pending_relations: Vec<PbfRelation>,
    timestamp: i64,
}

impl OsmPbfWriter {
    /// Creates a new derived PBF at `path`, writing the header block
    /// immediately. `timestamp` is the synthetic Unix timestamp stamped
    /// on every emitted entity (captured once per run by the caller, not
    /// re-read per entity, so output is stable within a run).
    pub fn create(path: impl AsRef<Path>, timestamp: i64) -> io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        write_header_block(&mut out)?;
        Ok(Self {
            out,
            phase: Phase::Nodes,
            pending_nodes: Vec::new(),
            pending_ways: Vec::new(),
            pending_relations: Vec::new(),
            timestamp,
        })
    }

    fn enter_phase(&mut self, phase: Phase) -> io::Result<()> {
        if phase == self.phase {
            return Ok(());
        }
        if (phase as u8) < (self.phase as u8) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "PBF sections must be written nodes, then ways, then relations",
            ));
        }
        self.flush_pending()?;
        self.phase = phase;
        Ok(())
    }

    fn flush_pending(&mut self) -> io::Result<()> {
        match self.phase {
            Phase::Nodes if !self.pending_nodes.is_empty() => {
                let nodes = std::mem::take(&mut self.pending_nodes);
                write_node_block(&mut self.out, &nodes, self.timestamp)?;
            }
            Phase::Ways if !self.pending_ways.is_empty() => {
                let ways = std::mem::take(&mut self.pending_ways);
                write_way_block(&mut self.out, &ways, self.timestamp)?;
            }
            Phase::Relations if !self.pending_relations.is_empty() => {
                let relations = std::mem::take(&mut self.pending_relations);
                write_relation_block(&mut self.out, &relations, self.timestamp)?;
            }
            _ => {}
        }
        Ok(())
    }
}

impl PbfSink for OsmPbfWriter {
    fn write_node(&mut self, node: &PbfNode) -> io::Result<()> {
        self.enter_phase(Phase::Nodes)?;
        self.pending_nodes.push(node.clone());
        if self.pending_nodes.len() >= BATCH_SIZE {
            self.flush_pending()?;
        }
        Ok(())
    }

    fn write_way(&mut self, way: &PbfWay) -> io::Result<()> {
        self.enter_phase(Phase::Ways)?;
        self.pending_ways.push(way.clone());
        if self.pending_ways.len() >= BATCH_SIZE {
            self.flush_pending()?;
        }
        Ok(())
    }

    fn write_relation(&mut self, relation: &PbfRelation) -> io::Result<()> {
        self.enter_phase(Phase::Relations)?;
        self.pending_relations.push(relation.clone());
        if self.pending_relations.len() >= BATCH_SIZE {
            self.flush_pending()?;
        }
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush_pending()?;
        self.phase = Phase::Done;
        self.out.flush()
    }
}

fn write_blob(out: &mut impl Write, blob_type: &str, payload: &[u8]) -> io::Result<()> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload)?;
    let compressed = encoder.finish()?;

    let blob = Blob {
        raw: None,
        raw_size: Some(payload.len() as i32),
        zlib_data: Some(compressed),
        lzma_data: None,
        obsolete_bzip2_data: None,
        lz4_data: None,
        zstd_data: None,
    };
    let blob_bytes = blob.encode_to_vec();

    let header = BlobHeader {
        r#type: blob_type.to_string(),
        indexdata: None,
        datasize: blob_bytes.len() as i32,
    };
    let header_bytes = header.encode_to_vec();

    out.write_all(&(header_bytes.len() as u32).to_be_bytes())?;
    out.write_all(&header_bytes)?;
    out.write_all(&blob_bytes)?;
    Ok(())
}

fn write_header_block(out: &mut impl Write) -> io::Result<()> {
    let header = HeaderBlock {
        bbox: None,
        required_features: vec!["OsmSchema-V0.6".to_string()],
        optional_features: Vec::new(),
        writingprogram: Some("osmseg".to_string()),
        source: None,
        osmosis_replication_timestamp: None,
        osmosis_replication_sequence_number: None,
        osmosis_replication_base_url: None,
    };
    write_blob(out, "OSMHeader", &header.encode_to_vec())
}

fn write_node_block(out: &mut impl Write, nodes: &[PbfNode], timestamp: i64) -> io::Result<()> {
    let mut strings = StringTableBuilder::new();
    let user_sid = strings.intern("anonymous");

    let wire_nodes: Vec<Node> = nodes
        .iter()
        .map(|node| {
            let mut keys = Vec::with_capacity(node.tags.len());
            let mut vals = Vec::with_capacity(node.tags.len());
            for (key, value) in &node.tags {
                keys.push(strings.intern(key) as u32);
                vals.push(strings.intern(value) as u32);
            }
            Node {
                id: node.id,
                keys,
                vals,
                info: Some(synthetic_info(timestamp, user_sid)),
                lat: encode_coord(node.lat),
                lon: encode_coord(node.lon),
            }
        })
        .collect();

    let block = PrimitiveBlock {
        stringtable: strings.build(),
        primitivegroup: vec![PrimitiveGroup {
            nodes: wire_nodes,
            dense: None,
            ways: Vec::new(),
            relations: Vec::new(),
        }],
        granularity: Some(100),
        lat_offset: Some(0),
        lon_offset: Some(0),
        date_granularity: Some(1000),
    };
    write_blob(out, "OSMData", &block.encode_to_vec())
}

fn write_way_block(out: &mut impl Write, ways: &[PbfWay], timestamp: i64) -> io::Result<()> {
    let mut strings = StringTableBuilder::new();
    let user_sid = strings.intern("anonymous");

    let wire_ways: Vec<Way> = ways
        .iter()
        .map(|way| {
            let mut keys = Vec::with_capacity(way.tags.len());
            let mut vals = Vec::with_capacity(way.tags.len());
            for (key, value) in &way.tags {
                keys.push(strings.intern(key) as u32);
                vals.push(strings.intern(value) as u32);
            }
            Way {
                id: way.id,
                keys,
                vals,
                info: Some(synthetic_info(timestamp, user_sid)),
                refs: delta_encode(&way.node_refs),
            }
        })
        .collect();

    let block = PrimitiveBlock {
        stringtable: strings.build(),
        primitivegroup: vec![PrimitiveGroup {
            nodes: Vec::new(),
            dense: None,
            ways: wire_ways,
            relations: Vec::new(),
        }],
        granularity: Some(100),
        lat_offset: Some(0),
        lon_offset: Some(0),
        date_granularity: Some(1000),
    };
    write_blob(out, "OSMData", &block.encode_to_vec())
}

fn write_relation_block(out: &mut impl Write, relations: &[PbfRelation], timestamp: i64) -> io::Result<()> {
    let mut strings = StringTableBuilder::new();
    let user_sid = strings.intern("anonymous");

    let wire_relations: Vec<Relation> = relations
        .iter()
        .map(|relation| {
            let mut keys = Vec::with_capacity(relation.tags.len());
            let mut vals = Vec::with_capacity(relation.tags.len());
            for (key, value) in &relation.tags {
                keys.push(strings.intern(key) as u32);
                vals.push(strings.intern(value) as u32);
            }
            let mut roles_sid = Vec::with_capacity(relation.members.len());
            let mut raw_memids = Vec::with_capacity(relation.members.len());
            let mut types = Vec::with_capacity(relation.members.len());
            for member in &relation.members {
                roles_sid.push(strings.intern(&member.role));
                raw_memids.push(member.member_id);
                types.push(match member.member_type {
                    MemberType::Node => WireMemberType::Node as i32,
                    MemberType::Way => WireMemberType::Way as i32,
                    MemberType::Relation => WireMemberType::Relation as i32,
                });
            }
            let memids = delta_encode(&raw_memids);
            Relation {
                id: relation.id,
                keys,
                vals,
                info: Some(synthetic_info(timestamp, user_sid)),
                roles_sid,
                memids,
                types,
            }
        })
        .collect();

    let block = PrimitiveBlock {
        stringtable: strings.build(),
        primitivegroup: vec![PrimitiveGroup {
            nodes: Vec::new(),
            dense: None,
            ways: Vec::new(),
            relations: wire_relations,
        }],
        granularity: Some(100),
        lat_offset: Some(0),
        lon_offset: Some(0),
        date_granularity: Some(1000),
    };
    write_blob(out, "OSMData", &block.encode_to_vec())
}
