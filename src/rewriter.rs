//! Rewrites route relations so their `WAY` members reference produced
//! segment ways instead of the original base ways.

use std::collections::HashMap;
use std::path::Path;

use crate::error::PipelineResult;
use crate::relation_cache::{Member, MemberType, RouteRelation};
use crate::segment_store::{SegmentRecord, SegmentStoreReader};

/// Loads the segment store (optionally dropping barrier records) and
/// groups records by `base_way_id`, each group sorted ascending by
/// `seg_index`, ready to expand `WAY` members.
pub struct RelationRewriter {
    by_base_way: HashMap<i64, Vec<SegmentRecord>>,
}

impl RelationRewriter {
    /// Builds a rewriter from the segment store at `segments_path`.
    /// When `include_barriers` is `false`, barrier-flagged records are
    /// dropped before grouping.
    pub fn from_segment_store(segments_path: impl AsRef<Path>, include_barriers: bool) -> PipelineResult<Self> {
        let reader = SegmentStoreReader::open_streaming(segments_path)?;
        let mut by_base_way: HashMap<i64, Vec<SegmentRecord>> = HashMap::new();
        for record in reader {
            let record = record?;
            if !include_barriers && record.is_barrier() {
                continue;
            }
            by_base_way.entry(record.base_way_id).or_default().push(record);
        }
        for group in by_base_way.values_mut() {
            group.sort_by_key(|r| r.seg_index);
        }
        Ok(Self { by_base_way })
    }

    /// Builds a rewriter directly from already-loaded records (test and
    /// in-memory-pipeline convenience).
    #[must_use]
    pub fn from_records(records: Vec<SegmentRecord>, include_barriers: bool) -> Self {
        let mut by_base_way: HashMap<i64, Vec<SegmentRecord>> = HashMap::new();
        for record in records {
            if !include_barriers && record.is_barrier() {
                continue;
            }
            by_base_way.entry(record.base_way_id).or_default().push(record);
        }
        for group in by_base_way.values_mut() {
            group.sort_by_key(|r| r.seg_index);
        }
        Self { by_base_way }
    }

    /// Rewrites one relation: every `WAY` member whose `ref` matches a
    /// known base way is replaced by one `WAY` member per segment, in
    /// ascending `seg_index` order, role copied from the original member.
    /// `WAY` members with an unknown ref, and all `NODE`/`RELATION`
    /// members, pass through unchanged in their original relative order.
    #[must_use]
    pub fn rewrite(&self, relation: &RouteRelation) -> RouteRelation {
        let mut members = Vec::with_capacity(relation.members.len());
        for member in &relation.members {
            if member.member_type == MemberType::Way {
                if let Some(group) = self.by_base_way.get(&member.member_ref) {
                    for record in group {
                        members.push(Member {
                            member_type: MemberType::Way,
                            member_ref: i64::from(record.edge_id),
                            role: member.role.clone(),
                        });
                    }
                    continue;
                }
            }
            members.push(member.clone());
        }

        RouteRelation {
            id: relation.id,
            tags: relation.tags.clone(),
            members,
        }
    }

    /// Rewrites every relation in `relations`, preserving source order.
    #[must_use]
    pub fn rewrite_all(&self, relations: &[RouteRelation]) -> Vec<RouteRelation> {
        relations.iter().map(|r| self.rewrite(r)).collect()
    }

    /// The ordered segment records for a base way, if any were captured.
    #[must_use]
    pub fn segments_for(&self, base_way_id: i64) -> Option<&[SegmentRecord]> {
        self.by_base_way.get(&base_way_id).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_store::BARRIER_FLAG;

    fn record(edge_id: u32, base_way_id: i64, seg_index: u32, flags: u8) -> SegmentRecord {
        SegmentRecord {
            edge_id,
            base_way_id,
            seg_index,
            flags,
            node_refs: vec![1, 2],
        }
    }

    #[test]
    fn test_single_way_two_segment_rewrite() {
        let records = vec![record(0, 100, 0, 0), record(1, 100, 1, 0)];
        let rewriter = RelationRewriter::from_records(records, true);

        let relation = RouteRelation {
            id: 1,
            tags: HashMap::new(),
            members: vec![Member {
                member_type: MemberType::Way,
                member_ref: 100,
                role: "forward".to_string(),
            }],
        };

        let rewritten = rewriter.rewrite(&relation);
        assert_eq!(rewritten.id, 1);
        assert_eq!(rewritten.members.len(), 2);
        assert_eq!(rewritten.members[0].member_ref, 0);
        assert_eq!(rewritten.members[1].member_ref, 1);
        assert_eq!(rewritten.members[0].role, "forward");
        assert_eq!(rewritten.members[1].role, "forward");
    }

    #[test]
    fn test_unknown_way_passes_through() {
        let rewriter = RelationRewriter::from_records(vec![record(0, 100, 0, 0)], true);
        let relation = RouteRelation {
            id: 2,
            tags: HashMap::new(),
            members: vec![Member { member_type: MemberType::Way, member_ref: 999, role: String::new() }],
        };
        let rewritten = rewriter.rewrite(&relation);
        assert_eq!(rewritten.members, relation.members);
    }

    #[test]
    fn test_non_way_members_preserve_relative_order() {
        let rewriter = RelationRewriter::from_records(vec![record(0, 100, 0, 0)], true);
        let relation = RouteRelation {
            id: 3,
            tags: HashMap::new(),
            members: vec![
                Member { member_type: MemberType::Node, member_ref: 1, role: String::new() },
                Member { member_type: MemberType::Way, member_ref: 100, role: "fwd".to_string() },
                Member { member_type: MemberType::Relation, member_ref: 5, role: String::new() },
            ],
        };
        let rewritten = rewriter.rewrite(&relation);
        assert_eq!(rewritten.members[0].member_type, MemberType::Node);
        assert_eq!(rewritten.members[1].member_type, MemberType::Way);
        assert_eq!(rewritten.members[1].member_ref, 0);
        assert_eq!(rewritten.members[2].member_type, MemberType::Relation);
    }

    #[test]
    fn test_barrier_filter_excludes_flagged_records() {
        let records = vec![
            record(0, 1, 0, 0),
            record(1, 1, 1, 0),
            record(2, 2, 0, BARRIER_FLAG),
            record(3, 3, 0, 0),
        ];
        let excluding = RelationRewriter::from_records(records.clone(), false);
        assert!(excluding.segments_for(1).is_some());
        assert!(excluding.segments_for(2).is_none());
        assert!(excluding.segments_for(3).is_some());

        let including = RelationRewriter::from_records(records, true);
        assert!(including.segments_for(2).is_some());
    }
}
