//! The assemble stage: joins the segment store and the three caches into
//! a derived PBF, emitting nodes, then ways, then relations.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{PipelineError, PipelineResult, ValidationError};
use crate::idset::{external_sort_unique, SpillWriter};
use crate::node_cache::{self, NodeCacheReader, NodeCoords};
use crate::pbf_io::{PbfNode, PbfRelation, PbfRelationMember, PbfSink, PbfWay};
use crate::relation_cache::{self, Member, RouteRelation};
use crate::rewriter::RelationRewriter;
use crate::segment_store::{SegmentRecord, SegmentStoreReader};
use crate::skip::SkipCounters;
use crate::way_tag_cache::{self, WayTagCacheReader, OUTPUT_TAG_WHITELIST};

enum NodeSource {
    Binary(NodeCacheReader),
    Text(HashMap<i64, NodeCoords>),
}

impl NodeSource {
    fn get(&self, id: i64) -> Option<NodeCoords> {
        match self {
            NodeSource::Binary(reader) => reader.get(id),
            NodeSource::Text(map) => map.get(&id).copied(),
        }
    }
}

enum WayTagSource {
    Binary(WayTagCacheReader),
    Text(HashMap<i64, HashMap<String, String>>),
}

impl WayTagSource {
    fn get(&self, way_id: i64) -> Option<&HashMap<String, String>> {
        match self {
            WayTagSource::Binary(reader) => reader.get(way_id),
            WayTagSource::Text(map) => map.get(&way_id),
        }
    }
}

fn load_node_source(cache_dir: &Path) -> PipelineResult<NodeSource> {
    let bin_path = cache_dir.join("nodes.bin");
    let txt_path = cache_dir.join("nodes.txt");
    if bin_path.exists() {
        Ok(NodeSource::Binary(NodeCacheReader::open(&bin_path)?))
    } else if txt_path.exists() {
        Ok(NodeSource::Text(node_cache::read_text_cache(&txt_path)?))
    } else {
        Err(PipelineError::Validation(ValidationError::MissingPath { path: bin_path }))
    }
}

fn load_way_tag_source(cache_dir: &Path) -> PipelineResult<WayTagSource> {
    let bin_path = cache_dir.join("way_tags.bin");
    let txt_path = cache_dir.join("way_tags.txt");
    if bin_path.exists() {
        Ok(WayTagSource::Binary(WayTagCacheReader::open(&bin_path)?))
    } else if txt_path.exists() {
        Ok(WayTagSource::Text(way_tag_cache::read_text_cache(&txt_path)?))
    } else {
        Err(PipelineError::Validation(ValidationError::MissingPath { path: bin_path }))
    }
}

/// Returns the base way's tags if this record should be emitted: not
/// filtered by the barrier toggle, and its base way carries a `highway`
/// tag in the way-tag cache. Updates `skip` for every way dropped along
/// the way.
fn included_way_tags<'a>(
    record: &SegmentRecord,
    way_tags: &'a WayTagSource,
    include_barriers: bool,
    skip: &mut SkipCounters,
) -> Option<&'a HashMap<String, String>> {
    if !include_barriers && record.is_barrier() {
        return None;
    }
    match way_tags.get(record.base_way_id) {
        None => {
            skip.note_missing_way_tags(record.base_way_id);
            None
        }
        Some(tags) => {
            if tags.contains_key("highway") {
                Some(tags)
            } else {
                skip.note_non_highway();
                None
            }
        }
    }
}

/// Runs the assemble stage: reads `segments_path` and the caches under
/// `cache_dir`, writes a derived PBF to `out_path`. `temp_dir` hosts the
/// transient spill file used to dedupe the emitted node-id set.
/// `timestamp` is stamped on every synthetic entity.
pub fn assemble(
    segments_path: impl AsRef<Path>,
    cache_dir: impl AsRef<Path>,
    out_path: impl AsRef<Path>,
    temp_dir: impl AsRef<Path>,
    include_barriers: bool,
    timestamp: i64,
) -> PipelineResult<SkipCounters> {
    let segments_path = segments_path.as_ref();
    let cache_dir = cache_dir.as_ref();
    let out_path = out_path.as_ref();
    let temp_dir = temp_dir.as_ref();

    let node_source = load_node_source(cache_dir)?;
    let way_tag_source = load_way_tag_source(cache_dir)?;
    let mut skip = SkipCounters::default();

    let node_ids = collect_output_node_ids(
        segments_path,
        &way_tag_source,
        include_barriers,
        temp_dir,
        &mut skip,
    )?;

    let mut sink: Box<dyn PbfSink> =
        Box::new(crate::pbf_io::OsmPbfWriter::create(out_path, timestamp)?);

    for node_id in &node_ids {
        match node_source.get(*node_id) {
            Some(coords) => {
                sink.write_node(&PbfNode {
                    id: *node_id,
                    lat: coords.lat,
                    lon: coords.lon,
                    tags: HashMap::new(),
                })?;
            }
            None => skip.note_missing_node(*node_id),
        }
    }

    emit_ways(segments_path, &way_tag_source, include_barriers, &mut sink, &mut skip)?;

    let rewriter = RelationRewriter::from_segment_store(segments_path, include_barriers)?;
    let relations = relation_cache::read_relations(cache_dir.join("relations.txt"))?;
    let rewritten = rewriter.rewrite_all(&relations);
    for relation in &rewritten {
        sink.write_relation(&to_pbf_relation(relation))?;
    }

    sink.finish()?;
    Ok(skip)
}

fn collect_output_node_ids(
    segments_path: &Path,
    way_tags: &WayTagSource,
    include_barriers: bool,
    temp_dir: &Path,
    skip: &mut SkipCounters,
) -> PipelineResult<Vec<i64>> {
    let spill_path = temp_dir.join("assemble_node_ids.bin");
    let mut spill = SpillWriter::create(&spill_path)?;

    let reader = SegmentStoreReader::open_streaming(segments_path)?;
    for record in reader {
        let record = record?;
        if included_way_tags(&record, way_tags, include_barriers, skip).is_some() {
            spill.push_all(&record.node_refs)?;
        }
    }
    let spill_path = spill.finish()?;

    Ok(external_sort_unique(
        &spill_path,
        temp_dir,
        "assemble_nodes",
        crate::idset::DEFAULT_CHUNK_SIZE,
    )?)
}

fn emit_ways(
    segments_path: &Path,
    way_tags: &WayTagSource,
    include_barriers: bool,
    sink: &mut Box<dyn PbfSink>,
    skip: &mut SkipCounters,
) -> PipelineResult<()> {
    let reader = SegmentStoreReader::open_streaming(segments_path)?;
    for record in reader {
        let record = record?;
        let Some(base_tags) = included_way_tags(&record, way_tags, include_barriers, skip) else {
            continue;
        };

        let mut tags: HashMap<String, String> = base_tags
            .iter()
            .filter(|(k, _)| OUTPUT_TAG_WHITELIST.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        tags.insert("base_id".to_string(), record.base_way_id.to_string());

        sink.write_way(&PbfWay {
            id: i64::from(record.edge_id),
            node_refs: record.node_refs,
            tags,
        })?;
    }
    Ok(())
}

fn to_pbf_relation(relation: &RouteRelation) -> PbfRelation {
    PbfRelation {
        id: relation.id,
        tags: relation.tags.clone(),
        members: relation
            .members
            .iter()
            .map(|m: &Member| PbfRelationMember {
                member_type: m.member_type,
                member_id: m.member_ref,
                role: m.role.clone(),
            })
            .collect(),
    }
}
