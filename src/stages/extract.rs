//! `extract-osm`: builds the node cache, way-tag cache, and relation
//! cache from one (or two, with `--build-dictionary`) passes over the
//! source PBF plus the segment store's referenced-id sets.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult, ValidationError};
use crate::idset::{self, SpillWriter};
use crate::node_cache::{self, NodeCacheWriter, NodeCoords};
use crate::pbf_io::{OsmPbfSource, PbfElement, PbfSource};
use crate::relation_cache::{self, Member, RouteRelation};
use crate::segment_store::SegmentStoreReader;
use crate::stages::{check_outputs, StageStatus};
use crate::way_tag_cache::{self, TagDictionary, WayTagCacheWriter};

/// Result of running the extract stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// All declared outputs already existed and `force` was not set.
    Skipped,
    /// Extraction ran to completion.
    Completed(ExtractReport),
}

/// Counts of entities written to the caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExtractReport {
    /// Nodes written to the node cache.
    pub nodes_cached: usize,
    /// Ways written to the way-tag cache.
    pub ways_cached: usize,
    /// Route/route_master relations written to the relation cache.
    pub relations_cached: usize,
}

/// Runs `extract-osm --osm <pbf> --segments <rseg> --out <cache-dir>
/// [--optimized] [--build-dictionary] [--force]`.
pub fn run_extract_stage(
    osm_path: &Path,
    segments_path: &Path,
    out_dir: &Path,
    optimized: bool,
    build_dictionary: bool,
    force: bool,
) -> PipelineResult<ExtractOutcome> {
    if !osm_path.exists() {
        return Err(PipelineError::Validation(ValidationError::MissingPath { path: osm_path.to_path_buf() }));
    }
    if !osm_path.is_file() {
        return Err(PipelineError::Validation(ValidationError::NotAFile { path: osm_path.to_path_buf() }));
    }
    if !segments_path.exists() {
        return Err(PipelineError::Validation(ValidationError::MissingPath { path: segments_path.to_path_buf() }));
    }

    let node_cache_path = out_dir.join(if optimized { "nodes.bin" } else { "nodes.txt" });
    let way_cache_path = out_dir.join(if optimized { "way_tags.bin" } else { "way_tags.txt" });
    let relations_path = out_dir.join("relations.txt");

    if check_outputs(&[&node_cache_path, &way_cache_path, &relations_path]) == StageStatus::Complete && !force {
        eprintln!("extract: outputs already present in {}, skipping (pass --force to overwrite)", out_dir.display());
        return Ok(ExtractOutcome::Skipped);
    }

    fs::create_dir_all(out_dir)?;

    let config = PipelineConfig::default().validate()?;
    let (node_ids, way_ids) = collect_referenced_ids(segments_path, out_dir, config.sort_chunk_size)?;
    eprintln!("extract: {} referenced node id(s), {} referenced way id(s)", node_ids.len(), way_ids.len());

    let dictionary = if build_dictionary {
        let dict = build_tag_dictionary(osm_path, &way_ids, config.dictionary_sample_cap)?;
        eprintln!("extract: built tag dictionary with {} entries", dict.len());
        dict
    } else {
        TagDictionary::default()
    };

    let report = if optimized {
        extract_binary(osm_path, &node_ids, &way_ids, &dictionary, &node_cache_path, &way_cache_path, &relations_path)?
    } else {
        extract_text(osm_path, &node_ids, &way_ids, &node_cache_path, &way_cache_path, &relations_path)?
    };

    eprintln!(
        "extract: cached {} node(s), {} way(s), {} relation(s)",
        report.nodes_cached, report.ways_cached, report.relations_cached
    );
    Ok(ExtractOutcome::Completed(report))
}

/// Scans the segment store once, spilling every `node_refs` entry and
/// every `base_way_id`, then external-sorts each into a deduplicated,
/// ascending id array. No barrier filtering here: both barrier and
/// non-barrier segments reference nodes and a base way that the caches
/// must cover.
fn collect_referenced_ids(
    segments_path: &Path,
    temp_dir: &Path,
    chunk_size: usize,
) -> PipelineResult<(Vec<i64>, Vec<i64>)> {
    let node_spill_path = temp_dir.join("node_ids.spill");
    let way_spill_path = temp_dir.join("way_ids.spill");
    let mut node_spill = SpillWriter::create(&node_spill_path)?;
    let mut way_spill = SpillWriter::create(&way_spill_path)?;

    for record in SegmentStoreReader::open_streaming(segments_path)? {
        let record = record?;
        node_spill.push_all(&record.node_refs)?;
        way_spill.push(record.base_way_id)?;
    }
    let node_spill_path = node_spill.finish()?;
    let way_spill_path = way_spill.finish()?;

    let node_ids = idset::external_sort_unique(&node_spill_path, temp_dir, "node_ids", chunk_size)?;
    let way_ids = idset::external_sort_unique(&way_spill_path, temp_dir, "way_ids", chunk_size)?;
    Ok((node_ids, way_ids))
}

fn build_tag_dictionary(osm_path: &Path, way_ids: &[i64], sample_cap: usize) -> PipelineResult<TagDictionary> {
    let mut sample = Vec::new();
    let mut source = OsmPbfSource::open(osm_path)?;
    source.for_each_element(&mut |element| {
        if let PbfElement::Way(way) = element {
            if sample.len() < sample_cap && idset::contains_sorted(way_ids, way.id) {
                sample.push(way.tags);
            }
        }
        Ok(())
    })?;
    Ok(TagDictionary::build_from_sample(sample.iter()))
}

fn is_route_relation(tags: &HashMap<String, String>) -> bool {
    matches!(tags.get("type").map(String::as_str), Some("route") | Some("route_master"))
}

fn to_route_relation(id: i64, tags: HashMap<String, String>, members: Vec<crate::pbf_io::PbfRelationMember>) -> RouteRelation {
    RouteRelation {
        id,
        tags,
        members: members
            .into_iter()
            .map(|m| Member { member_type: m.member_type, member_ref: m.member_id, role: m.role })
            .collect(),
    }
}

fn extract_binary(
    osm_path: &Path,
    node_ids: &[i64],
    way_ids: &[i64],
    dictionary: &TagDictionary,
    node_cache_path: &Path,
    way_cache_path: &Path,
    relations_path: &Path,
) -> PipelineResult<ExtractReport> {
    let mut node_writer = NodeCacheWriter::create(node_cache_path)?;
    let mut way_writer = WayTagCacheWriter::create(way_cache_path, dictionary.clone())?;
    let mut relations = Vec::new();
    let mut report = ExtractReport::default();

    let mut source = OsmPbfSource::open(osm_path)?;
    source.for_each_element(&mut |element| {
        match element {
            PbfElement::Node(node) if idset::contains_sorted(node_ids, node.id) => {
                let ele = parse_elevation(&node.tags);
                node_writer.put(node.id, NodeCoords { lat: node.lat, lon: node.lon, ele })?;
                report.nodes_cached += 1;
            }
            PbfElement::Way(way) if idset::contains_sorted(way_ids, way.id) => {
                way_writer.put(way.id, &way.tags)?;
                report.ways_cached += 1;
            }
            PbfElement::Relation(relation) if is_route_relation(&relation.tags) => {
                relations.push(to_route_relation(relation.id, relation.tags, relation.members));
                report.relations_cached += 1;
            }
            _ => {}
        }
        Ok(())
    })?;

    node_writer.finish()?;
    way_writer.finish()?;
    relation_cache::write_relations(relations_path, &relations)?;
    Ok(report)
}

fn extract_text(
    osm_path: &Path,
    node_ids: &[i64],
    way_ids: &[i64],
    node_cache_path: &Path,
    way_cache_path: &Path,
    relations_path: &Path,
) -> PipelineResult<ExtractReport> {
    let mut nodes = Vec::new();
    let mut ways = Vec::new();
    let mut relations = Vec::new();

    let mut source = OsmPbfSource::open(osm_path)?;
    source.for_each_element(&mut |element| {
        match element {
            PbfElement::Node(node) if idset::contains_sorted(node_ids, node.id) => {
                let ele = parse_elevation(&node.tags);
                nodes.push((node.id, NodeCoords { lat: node.lat, lon: node.lon, ele }));
            }
            PbfElement::Way(way) if idset::contains_sorted(way_ids, way.id) => {
                ways.push((way.id, way.tags));
            }
            PbfElement::Relation(relation) if is_route_relation(&relation.tags) => {
                relations.push(to_route_relation(relation.id, relation.tags, relation.members));
            }
            _ => {}
        }
        Ok(())
    })?;

    let report = ExtractReport { nodes_cached: nodes.len(), ways_cached: ways.len(), relations_cached: relations.len() };
    node_cache::write_text_cache(node_cache_path, &nodes)?;
    way_tag_cache::write_text_cache(way_cache_path, &ways)?;
    relation_cache::write_relations(relations_path, &relations)?;
    Ok(report)
}

fn parse_elevation(tags: &HashMap<String, String>) -> f64 {
    tags.get("ele").and_then(|s| s.parse().ok()).unwrap_or(f64::NAN)
}
