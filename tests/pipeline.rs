//! Black-box test driving capture -> extract-shaped cache writes ->
//! assemble through the public crate API, then re-reading the derived
//! PBF with the same reader adapter the real `extract-osm`/`capture-segments`
//! subcommands use, to check the three stages compose end to end.

use std::collections::HashMap;

use osmseg::capture::{CaptureDriver, PendingSegment};
use osmseg::node_cache::{NodeCacheWriter, NodeCoords};
use osmseg::pbf_io::{OsmPbfSource, PbfElement, PbfSource};
use osmseg::relation_cache::{write_relations, Member, MemberType, RouteRelation};
use osmseg::segment_store::SegmentWriter;
use osmseg::way_tag_cache::{TagDictionary, WayTagCacheWriter};

#[test]
fn capture_extract_assemble_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let segments_path = dir.path().join("route.rseg");
    let cache_dir = dir.path().join("cache");
    std::fs::create_dir_all(&cache_dir).unwrap();
    let out_path = dir.path().join("derived.osm.pbf");

    // capture: one base way split into two segments, one single-segment way.
    {
        let mut writer = SegmentWriter::create(&segments_path).unwrap();
        let mut driver = CaptureDriver::new(&mut writer);
        driver.pre(PendingSegment {
            base_way_id: 100,
            node_refs: vec![1, 2, 3],
            seg_index: 0,
            is_barrier: false,
        });
        driver.commit().unwrap();
        driver.pre(PendingSegment {
            base_way_id: 100,
            node_refs: vec![3, 4],
            seg_index: 1,
            is_barrier: false,
        });
        driver.commit().unwrap();
        driver.pre(PendingSegment {
            base_way_id: 200,
            node_refs: vec![5, 6],
            seg_index: 0,
            is_barrier: false,
        });
        driver.commit().unwrap();
        driver.finish().unwrap();
        writer.close().unwrap();
    }

    // extract-shaped caches, written directly rather than via a real PBF
    // (osmpbf has no in-memory writer to build a fixture source from).
    {
        let mut node_writer = NodeCacheWriter::create(cache_dir.join("nodes.bin")).unwrap();
        for (id, lat, lon) in [(1i64, 1.0, 1.0), (2, 2.0, 2.0), (3, 3.0, 3.0), (4, 4.0, 4.0), (5, 5.0, 5.0), (6, 6.0, 6.0)] {
            node_writer.put(id, NodeCoords { lat, lon, ele: f64::NAN }).unwrap();
        }
        node_writer.finish().unwrap();

        let sample: Vec<HashMap<String, String>> = vec![[("highway".to_string(), "residential".to_string())].into_iter().collect()];
        let dictionary = TagDictionary::build_from_sample(sample.iter());
        let mut way_writer = WayTagCacheWriter::create(cache_dir.join("way_tags.bin"), dictionary).unwrap();
        let highway_tags: HashMap<String, String> = [("highway".to_string(), "residential".to_string())].into_iter().collect();
        way_writer.put(100, &highway_tags).unwrap();
        way_writer.put(200, &highway_tags).unwrap();
        way_writer.finish().unwrap();

        write_relations(
            cache_dir.join("relations.txt"),
            &[RouteRelation {
                id: 1,
                tags: [("type".to_string(), "route".to_string()), ("network".to_string(), "lcn".to_string())]
                    .into_iter()
                    .collect(),
                members: vec![
                    Member { member_type: MemberType::Way, member_ref: 100, role: String::new() },
                    Member { member_type: MemberType::Way, member_ref: 200, role: String::new() },
                ],
            }],
        )
        .unwrap();
    }

    // assemble
    let skip = osmseg::assemble::assemble(&segments_path, &cache_dir, &out_path, dir.path(), false, 1_700_000_000).unwrap();
    assert_eq!(skip.total(), 0);

    // read the derived PBF back and check shape: 6 nodes, 2 ways (edge ids
    // 0 and 1, 2), one relation whose WAY members were expanded in
    // seg_index order.
    let mut nodes = Vec::new();
    let mut ways = Vec::new();
    let mut relations = Vec::new();
    let mut source = OsmPbfSource::open(&out_path).unwrap();
    source
        .for_each_element(&mut |element| {
            match element {
                PbfElement::Node(n) => nodes.push(n),
                PbfElement::Way(w) => ways.push(w),
                PbfElement::Relation(r) => relations.push(r),
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(nodes.len(), 6);
    let node_ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
    assert_eq!(node_ids, vec![1, 2, 3, 4, 5, 6]);

    assert_eq!(ways.len(), 3);
    let way_ids: Vec<i64> = ways.iter().map(|w| w.id).collect();
    assert_eq!(way_ids, vec![0, 1, 2]);
    assert_eq!(ways[0].tags.get("base_id"), Some(&"100".to_string()));
    assert_eq!(ways[0].tags.get("highway"), Some(&"residential".to_string()));

    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].members.len(), 3);
    assert_eq!(relations[0].members[0].member_id, 0);
    assert_eq!(relations[0].members[1].member_id, 1);
    assert_eq!(relations[0].members[2].member_id, 2);
}

#[test]
fn barrier_filter_excludes_flagged_segments_from_output() {
    let dir = tempfile::tempdir().unwrap();
    let segments_path = dir.path().join("route.rseg");
    let cache_dir = dir.path().join("cache");
    std::fs::create_dir_all(&cache_dir).unwrap();

    {
        let mut writer = SegmentWriter::create(&segments_path).unwrap();
        let mut driver = CaptureDriver::new(&mut writer);
        driver.pre(PendingSegment { base_way_id: 10, node_refs: vec![1, 2], seg_index: 0, is_barrier: false });
        driver.commit().unwrap();
        driver.pre(PendingSegment { base_way_id: 10, node_refs: vec![2, 3], seg_index: 1, is_barrier: true });
        driver.commit().unwrap();
        driver.finish().unwrap();
        writer.close().unwrap();
    }
    {
        let mut node_writer = NodeCacheWriter::create(cache_dir.join("nodes.bin")).unwrap();
        for (id, lat, lon) in [(1i64, 1.0, 1.0), (2, 2.0, 2.0), (3, 3.0, 3.0)] {
            node_writer.put(id, NodeCoords { lat, lon, ele: f64::NAN }).unwrap();
        }
        node_writer.finish().unwrap();
        let mut way_writer = WayTagCacheWriter::create(cache_dir.join("way_tags.bin"), TagDictionary::default()).unwrap();
        let tags: HashMap<String, String> = [("highway".to_string(), "path".to_string())].into_iter().collect();
        way_writer.put(10, &tags).unwrap();
        way_writer.finish().unwrap();
        write_relations(cache_dir.join("relations.txt"), &[]).unwrap();
    }

    let excluded_out = dir.path().join("excluded.osm.pbf");
    osmseg::assemble::assemble(&segments_path, &cache_dir, &excluded_out, dir.path(), false, 0).unwrap();
    let mut excluded_ways = Vec::new();
    OsmPbfSource::open(&excluded_out)
        .unwrap()
        .for_each_element(&mut |el| {
            if let PbfElement::Way(w) = el {
                excluded_ways.push(w);
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(excluded_ways.len(), 1, "only the non-barrier segment should be emitted");

    let included_out = dir.path().join("included.osm.pbf");
    osmseg::assemble::assemble(&segments_path, &cache_dir, &included_out, dir.path(), true, 0).unwrap();
    let mut included_ways = Vec::new();
    OsmPbfSource::open(&included_out)
        .unwrap()
        .for_each_element(&mut |el| {
            if let PbfElement::Way(w) = el {
                included_ways.push(w);
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(included_ways.len(), 2, "including barriers should emit both segments as ways");
}
