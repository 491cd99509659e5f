//! Random-access map from OSM node id to `(lat, lon, ele)`.
//!
//! Two on-disk forms exist: a memory-mapped binary cache (`nodes.bin`) for
//! production runs, and a legacy CSV form (`nodes.txt`) kept for
//! diff-friendly debugging on small fixtures. The assembler picks whichever
//! is present.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{FormatError, PipelineResult};

const MAGIC: &[u8; 4] = b"RNOD";
const VERSION: u8 = 1;
const HEADER_LEN: usize = 9;
const INDEX_ENTRY_LEN: usize = 12;
const DATA_ENTRY_LEN: usize = 24;

/// One node's coordinates. `ele` is `NaN` when elevation is unknown.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeCoords {
    /// Latitude, degrees.
    pub lat: f64,
    /// Longitude, degrees.
    pub lon: f64,
    /// Elevation, meters, or `NaN` if unknown.
    pub ele: f64,
}

/// Writes the binary node cache. Appends to two temp files (index, data)
/// as the PBF scan emits qualifying nodes, then [`NodeCacheWriter::finish`]
/// concatenates header + index + data into the final file.
pub struct NodeCacheWriter {
    final_path: PathBuf,
    index_path: PathBuf,
    data_path: PathBuf,
    index_writer: BufWriter<File>,
    data_writer: BufWriter<File>,
    count: u32,
    next_offset: u32,
}

impl NodeCacheWriter {
    /// Creates a new node cache at `path`, using `path` with `.idx.tmp`
    /// and `.dat.tmp` suffixes for the intermediate files.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        let index_path = temp_sibling(&final_path, "idx");
        let data_path = temp_sibling(&final_path, "dat");

        let index_writer = BufWriter::new(File::create(&index_path)?);
        let data_writer = BufWriter::new(File::create(&data_path)?);

        Ok(Self {
            final_path,
            index_path,
            data_path,
            index_writer,
            data_writer,
            count: 0,
            next_offset: 0,
        })
    }

    /// Appends one node's coordinates, keyed by `id`.
    pub fn put(&mut self, id: i64, coords: NodeCoords) -> io::Result<()> {
        self.index_writer.write_all(&id.to_be_bytes())?;
        self.index_writer.write_all(&self.next_offset.to_be_bytes())?;

        self.data_writer.write_all(&coords.lat.to_be_bytes())?;
        self.data_writer.write_all(&coords.lon.to_be_bytes())?;
        self.data_writer.write_all(&coords.ele.to_be_bytes())?;

        self.count += 1;
        self.next_offset += DATA_ENTRY_LEN as u32;
        Ok(())
    }

    /// Concatenates header, index, and data into the final file, then
    /// removes the temp files.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.index_writer.flush()?;
        self.data_writer.flush()?;
        drop(self.index_writer);
        drop(self.data_writer);

        let mut out = BufWriter::new(File::create(&self.final_path)?);
        out.write_all(MAGIC)?;
        out.write_all(&[VERSION])?;
        out.write_all(&self.count.to_be_bytes())?;

        let mut index_in = File::open(&self.index_path)?;
        io::copy(&mut index_in, &mut out)?;
        let mut data_in = File::open(&self.data_path)?;
        io::copy(&mut data_in, &mut out)?;
        out.flush()?;

        let _ = fs::remove_file(&self.index_path);
        let _ = fs::remove_file(&self.data_path);

        Ok(self.final_path.clone())
    }
}

impl Drop for NodeCacheWriter {
    fn drop(&mut self) {
        if self.index_path.exists() {
            let _ = fs::remove_file(&self.index_path);
        }
        if self.data_path.exists() {
            let _ = fs::remove_file(&self.data_path);
        }
    }
}

fn temp_sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut os_string = path.as_os_str().to_owned();
    os_string.push(format!(".{suffix}.tmp"));
    PathBuf::from(os_string)
}

/// Read-only, memory-mapped view of a binary node cache.
///
/// The whole file is mapped; an in-memory `id -> data offset` hash is
/// built once at load time by scanning the mapped index section, so a
/// point lookup is one hash lookup plus reading three doubles out of the
/// page cache.
pub struct NodeCacheReader {
    mmap: Mmap,
    offsets: std::collections::HashMap<i64, u32>,
    data_base: usize,
}

impl NodeCacheReader {
    /// Opens and indexes a binary node cache at `path`.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_LEN {
            return Err(truncated(path.as_ref(), "header"));
        }
        if &mmap[0..4] != MAGIC {
            return Err(bad_magic(path.as_ref(), &mmap[0..4]));
        }
        if mmap[4] != VERSION {
            return Err(bad_version(path.as_ref(), mmap[4]));
        }
        let count = u32::from_be_bytes(mmap[5..9].try_into().unwrap()) as usize;

        let index_base = HEADER_LEN;
        let data_base = index_base + count * INDEX_ENTRY_LEN;
        if mmap.len() < data_base + count * DATA_ENTRY_LEN {
            return Err(truncated(path.as_ref(), "index/data section"));
        }

        let mut offsets = std::collections::HashMap::with_capacity(count);
        for i in 0..count {
            let entry = &mmap[index_base + i * INDEX_ENTRY_LEN..index_base + (i + 1) * INDEX_ENTRY_LEN];
            let id = i64::from_be_bytes(entry[0..8].try_into().unwrap());
            let offset = u32::from_be_bytes(entry[8..12].try_into().unwrap());
            offsets.insert(id, offset);
        }

        Ok(Self {
            mmap,
            offsets,
            data_base,
        })
    }

    /// Looks up coordinates for `id`.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<NodeCoords> {
        let &offset = self.offsets.get(&id)?;
        let base = self.data_base + offset as usize;
        let lat = f64::from_be_bytes(self.mmap[base..base + 8].try_into().unwrap());
        let lon = f64::from_be_bytes(self.mmap[base + 8..base + 16].try_into().unwrap());
        let ele = f64::from_be_bytes(self.mmap[base + 16..base + 24].try_into().unwrap());
        Some(NodeCoords { lat, lon, ele })
    }

    /// Number of nodes in this cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True if the cache holds no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

fn bad_magic(path: &Path, found: &[u8]) -> crate::error::PipelineError {
    FormatError::BadMagic {
        path: path.to_path_buf(),
        expected: MAGIC.as_slice(),
        found: found.to_vec(),
    }
    .into()
}

fn bad_version(path: &Path, found: u8) -> crate::error::PipelineError {
    FormatError::UnsupportedVersion {
        path: path.to_path_buf(),
        expected: VERSION,
        found,
    }
    .into()
}

fn truncated(path: &Path, detail: &str) -> crate::error::PipelineError {
    FormatError::TruncatedRecord {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
    .into()
}

/// Writes the legacy CSV node cache: `id,lat,lon,ele?` per line, empty
/// `ele` meaning unknown.
pub fn write_text_cache(path: impl AsRef<Path>, nodes: &[(i64, NodeCoords)]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (id, coords) in nodes {
        if coords.ele.is_nan() {
            writeln!(writer, "{id},{},{}", coords.lat, coords.lon)?;
        } else {
            writeln!(writer, "{id},{},{},{}", coords.lat, coords.lon, coords.ele)?;
        }
    }
    writer.flush()
}

/// Reads the legacy CSV node cache into memory.
pub fn read_text_cache(path: impl AsRef<Path>) -> io::Result<std::collections::HashMap<i64, NodeCoords>> {
    let path = path.as_ref();
    let reader = BufReader::new(OpenOptions::new().read(true).open(path)?);
    let mut out = std::collections::HashMap::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(4, ',');
        let id: i64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| malformed(path, &line))?;
        let lat: f64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| malformed(path, &line))?;
        let lon: f64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| malformed(path, &line))?;
        let ele = match parts.next() {
            Some(s) if !s.is_empty() => s.parse().map_err(|_| malformed(path, &line))?,
            _ => f64::NAN,
        };
        out.insert(id, NodeCoords { lat, lon, ele });
    }
    Ok(out)
}

fn malformed(path: &Path, line: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed node cache line in {}: {line:?}", path.display()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_binary_round_trip_with_nan_elevation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.bin");
        let mut writer = NodeCacheWriter::create(&path).unwrap();
        writer
            .put(1, NodeCoords { lat: 48.8, lon: 2.3, ele: 35.0 })
            .unwrap();
        writer
            .put(2, NodeCoords { lat: 1.0, lon: 2.0, ele: f64::NAN })
            .unwrap();
        writer.finish().unwrap();

        let reader = NodeCacheReader::open(&path).unwrap();
        assert_eq!(reader.len(), 2);
        let first = reader.get(1).unwrap();
        assert_eq!(first.lat, 48.8);
        assert_eq!(first.ele, 35.0);
        let second = reader.get(2).unwrap();
        assert!(second.ele.is_nan());
        assert!(reader.get(999).is_none());
    }

    #[test]
    fn test_binary_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.bin");
        fs::write(&path, b"XXXX\x01\x00\x00\x00\x00").unwrap();
        let err = NodeCacheReader::open(&path).unwrap_err();
        assert!(matches!(
            err,
            crate::error::PipelineError::Format(FormatError::BadMagic { .. })
        ));
    }

    #[test]
    fn test_writer_cleans_up_temp_files_on_finish() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.bin");
        let writer = NodeCacheWriter::create(&path).unwrap();
        let index_path = writer.index_path.clone();
        let data_path = writer.data_path.clone();
        writer.finish().unwrap();
        assert!(!index_path.exists());
        assert!(!data_path.exists());
    }

    #[test]
    fn test_text_cache_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nodes.txt");
        let nodes = vec![
            (1i64, NodeCoords { lat: 10.0, lon: 20.0, ele: 5.0 }),
            (2, NodeCoords { lat: -1.0, lon: -2.0, ele: f64::NAN }),
        ];
        write_text_cache(&path, &nodes).unwrap();
        let read_back = read_text_cache(&path).unwrap();
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[&1].lat, 10.0);
        assert!(read_back[&2].ele.is_nan());
    }
}
