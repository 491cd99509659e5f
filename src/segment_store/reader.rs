//! Readers for the segment store, in its two access modes.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::record::SegmentRecord;
use super::{HEADER_LEN, MAGIC, VERSION};
use crate::error::{FormatError, PipelineError, PipelineResult};

fn read_exact_checked(file: &mut impl Read, path: &Path, buf: &mut [u8], detail: &str) -> PipelineResult<()> {
    match file.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(PipelineError::Format(FormatError::TruncatedRecord {
            path: path.to_path_buf(),
            detail: detail.to_string(),
        })),
        Err(e) => Err(PipelineError::Io(e)),
    }
}

fn read_and_check_header(file: &mut File, path: &Path) -> PipelineResult<u32> {
    let mut magic = [0u8; 4];
    read_exact_checked(file, path, &mut magic, "segment store header magic")?;
    if &magic != MAGIC {
        return Err(PipelineError::Format(FormatError::BadMagic {
            path: path.to_path_buf(),
            expected: MAGIC.as_slice(),
            found: magic.to_vec(),
        }));
    }
    let mut version = [0u8; 1];
    read_exact_checked(file, path, &mut version, "segment store header version")?;
    if version[0] != VERSION {
        return Err(PipelineError::Format(FormatError::UnsupportedVersion {
            path: path.to_path_buf(),
            expected: VERSION,
            found: version[0],
        }));
    }
    let mut count_buf = [0u8; 4];
    read_exact_checked(file, path, &mut count_buf, "segment store header record count")?;
    Ok(u32::from_be_bytes(count_buf))
}

/// Single-pass, lazy reader over a segment store. Cheap to open: reads
/// only the 9-byte header up front, then decodes one record per
/// `next()` call. Does not support point lookup; use
/// [`IndexedSegmentStoreReader`] for that.
pub struct SegmentStoreReader {
    reader: BufReader<File>,
    path: PathBuf,
    record_count: u32,
    yielded: u32,
}

impl SegmentStoreReader {
    /// Opens `path` in streaming mode, validating the header.
    pub fn open_streaming(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let record_count = read_and_check_header(&mut file, &path)?;
        Ok(Self {
            reader: BufReader::new(file),
            path,
            record_count,
            yielded: 0,
        })
    }

    /// Number of records declared in the header.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.record_count
    }

    /// Path this reader was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for SegmentStoreReader {
    type Item = io::Result<SegmentRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.yielded >= self.record_count {
            return None;
        }
        let result = SegmentRecord::read_from(&mut self.reader);
        if result.is_ok() {
            self.yielded += 1;
        }
        Some(result)
    }
}

/// Eagerly-indexed reader: scans the file once on open, building an
/// `edge_id -> file_offset` map, then serves point lookups by seeking and
/// reading a single record. Safe for concurrent callers: the underlying
/// file handle is behind a [`Mutex`].
pub struct IndexedSegmentStoreReader {
    file: Mutex<File>,
    offsets: HashMap<u32, u64>,
    path: PathBuf,
}

impl IndexedSegmentStoreReader {
    /// Opens `path` in indexed mode, scanning the whole file once to build
    /// the offset map.
    pub fn open_indexed(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let record_count = read_and_check_header(&mut file, &path)?;

        let mut reader = BufReader::new(file);
        let mut offsets = HashMap::with_capacity(record_count as usize);
        let mut offset = HEADER_LEN;
        for _ in 0..record_count {
            let record = SegmentRecord::read_from(&mut reader)?;
            offsets.insert(record.edge_id, offset);
            offset += record.encoded_len();
        }

        file = reader.into_inner();
        Ok(Self {
            file: Mutex::new(file),
            offsets,
            path,
        })
    }

    /// Looks up the record for `edge_id`, or `None` if it is not present
    /// in this store.
    pub fn get(&self, edge_id: u32) -> io::Result<Option<SegmentRecord>> {
        let Some(&offset) = self.offsets.get(&edge_id) else {
            return Ok(None);
        };
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        file.seek(SeekFrom::Start(offset))?;
        SegmentRecord::read_from(&mut *file).map(Some)
    }

    /// Number of records indexed.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// True if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Path this reader was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::super::writer::SegmentWriter;
    use super::*;
    use tempfile::tempdir;

    fn write_sample(path: &Path) {
        let mut writer = SegmentWriter::create(path).unwrap();
        writer
            .write(&SegmentRecord {
                edge_id: 10,
                base_way_id: 5,
                seg_index: 0,
                flags: 0,
                node_refs: vec![1, 2, 3],
            })
            .unwrap();
        writer
            .write(&SegmentRecord {
                edge_id: 11,
                base_way_id: 5,
                seg_index: 1,
                flags: super::super::BARRIER_FLAG,
                node_refs: vec![3, 4],
            })
            .unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_streaming_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.rseg");
        std::fs::write(&path, b"XXXX\x01\x00\x00\x00\x00").unwrap();
        let err = SegmentStoreReader::open_streaming(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Format(FormatError::BadMagic { .. })));
    }

    #[test]
    fn test_indexed_point_lookup() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("idx.rseg");
        write_sample(&path);

        let indexed = IndexedSegmentStoreReader::open_indexed(&path).unwrap();
        assert_eq!(indexed.len(), 2);
        let rec = indexed.get(11).unwrap().unwrap();
        assert_eq!(rec.base_way_id, 5);
        assert!(rec.is_barrier());
        assert!(indexed.get(999).unwrap().is_none());
    }

    #[test]
    fn test_indexed_concurrent_lookup() {
        use std::sync::Arc;
        use std::thread;

        let dir = tempdir().unwrap();
        let path = dir.path().join("concurrent.rseg");
        write_sample(&path);

        let indexed = Arc::new(IndexedSegmentStoreReader::open_indexed(&path).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let indexed = Arc::clone(&indexed);
                thread::spawn(move || indexed.get(10).unwrap().unwrap().edge_id)
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 10);
        }
    }
}
