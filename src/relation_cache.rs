//! Line-oriented text cache of route and route_master relations.
//!
//! Chosen for diff-friendly debugging over a binary form: one block per
//! relation, `RELATION <id>` then zero or more `TAG k=v` and
//! `MEMBER <type>,<ref>,<role>` lines, terminated by a blank line. `k`,
//! `v`, and `role` are escaped with `\n` -> `\\n`, `,` -> `\\,`,
//! `=` -> `\\=`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// A relation's membership kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberType {
    /// A `NODE` member.
    Node,
    /// A `WAY` member.
    Way,
    /// A `RELATION` member.
    Relation,
}

impl MemberType {
    fn as_str(self) -> &'static str {
        match self {
            MemberType::Node => "NODE",
            MemberType::Way => "WAY",
            MemberType::Relation => "RELATION",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "NODE" => Some(MemberType::Node),
            "WAY" => Some(MemberType::Way),
            "RELATION" => Some(MemberType::Relation),
            _ => None,
        }
    }
}

/// One member of a relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Whether this member is a node, way, or relation.
    pub member_type: MemberType,
    /// The referenced entity's id (OSM id pre-rewrite, edge id post-rewrite
    /// for `WAY` members).
    pub member_ref: i64,
    /// The member's role string, possibly empty.
    pub role: String,
}

/// A route or route_master relation, verbatim except for later rewriting
/// of its `WAY` members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRelation {
    /// The relation's OSM id.
    pub id: i64,
    /// Tags, including `type = route | route_master`.
    pub tags: HashMap<String, String>,
    /// Members in source order.
    pub members: Vec<Member>,
}

/// Writes relations to the text relation cache, one block per relation.
pub fn write_relations(path: impl AsRef<Path>, relations: &[RouteRelation]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for relation in relations {
        writeln!(writer, "RELATION {}", relation.id)?;
        let mut keys: Vec<&String> = relation.tags.keys().collect();
        keys.sort();
        for key in keys {
            writeln!(writer, "TAG {}={}", escape(key), escape(&relation.tags[key]))?;
        }
        for member in &relation.members {
            writeln!(
                writer,
                "MEMBER {},{},{}",
                member.member_type.as_str(),
                member.member_ref,
                escape(&member.role)
            )?;
        }
        writeln!(writer)?;
    }
    writer.flush()
}

/// Reads the text relation cache back into memory, in source order.
pub fn read_relations(path: impl AsRef<Path>) -> io::Result<Vec<RouteRelation>> {
    let path = path.as_ref();
    let reader = BufReader::new(File::open(path)?);

    let mut relations = Vec::new();
    let mut current: Option<RouteRelation> = None;

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            if let Some(relation) = current.take() {
                relations.push(relation);
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("RELATION ") {
            let id: i64 = rest.parse().map_err(|_| malformed(path, &line))?;
            current = Some(RouteRelation {
                id,
                tags: HashMap::new(),
                members: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("TAG ") {
            let relation = current.as_mut().ok_or_else(|| malformed(path, &line))?;
            let (key, value) = split_unescaped_once(rest, '=').ok_or_else(|| malformed(path, &line))?;
            relation.tags.insert(unescape(&key), unescape(&value));
        } else if let Some(rest) = line.strip_prefix("MEMBER ") {
            let relation = current.as_mut().ok_or_else(|| malformed(path, &line))?;
            let parts = split_unescaped(rest, ',');
            if parts.len() != 3 {
                return Err(malformed(path, &line));
            }
            let member_type = MemberType::parse(&parts[0]).ok_or_else(|| malformed(path, &line))?;
            let member_ref: i64 = parts[1].parse().map_err(|_| malformed(path, &line))?;
            relation.members.push(Member {
                member_type,
                member_ref,
                role: unescape(&parts[2]),
            });
        } else {
            return Err(malformed(path, &line));
        }
    }
    if let Some(relation) = current.take() {
        relations.push(relation);
    }

    Ok(relations)
}

fn malformed(path: &Path, line: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed relation cache line in {}: {line:?}", path.display()),
    )
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\n', "\\n").replace(',', "\\,").replace('=', "\\=")
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(',') => out.push(','),
                Some('=') => out.push('='),
                Some('\\') => out.push('\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn split_unescaped(s: &str, delim: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            current.push(c);
            if let Some(next) = chars.next() {
                current.push(next);
            }
        } else if c == delim {
            parts.push(std::mem::take(&mut current));
        } else {
            current.push(c);
        }
    }
    parts.push(current);
    parts
}

fn split_unescaped_once(s: &str, delim: char) -> Option<(String, String)> {
    let parts = split_unescaped(s, delim);
    if parts.len() < 2 {
        return None;
    }
    let key = parts[0].clone();
    let value = parts[1..].join(&delim.to_string());
    Some((key, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_relation_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relations.txt");

        let relations = vec![RouteRelation {
            id: 42,
            tags: [("type".to_string(), "route".to_string()), ("name".to_string(), "A, B".to_string())]
                .into_iter()
                .collect(),
            members: vec![
                Member { member_type: MemberType::Way, member_ref: 100, role: "forward".to_string() },
                Member { member_type: MemberType::Node, member_ref: 7, role: String::new() },
            ],
        }];

        write_relations(&path, &relations).unwrap();
        let read_back = read_relations(&path).unwrap();
        assert_eq!(read_back, relations);
    }

    #[test]
    fn test_escaping_round_trips_special_characters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relations.txt");
        let relations = vec![RouteRelation {
            id: 1,
            tags: [("name".to_string(), "a=b,c\nd".to_string())].into_iter().collect(),
            members: vec![Member { member_type: MemberType::Way, member_ref: 1, role: "a,b=c".to_string() }],
        }];
        write_relations(&path, &relations).unwrap();
        let read_back = read_relations(&path).unwrap();
        assert_eq!(read_back[0].tags["name"], "a=b,c\nd");
        assert_eq!(read_back[0].members[0].role, "a,b=c");
    }

    #[test]
    fn test_multiple_relations_preserve_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("relations.txt");
        let relations = vec![
            RouteRelation { id: 1, tags: HashMap::new(), members: vec![] },
            RouteRelation { id: 2, tags: HashMap::new(), members: vec![] },
        ];
        write_relations(&path, &relations).unwrap();
        let read_back = read_relations(&path).unwrap();
        assert_eq!(read_back.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2]);
    }
}
