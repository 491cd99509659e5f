//! Append-only writer for the segment store (SS).

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::record::SegmentRecord;
use super::{MAGIC, RECORD_COUNT_OFFSET, VERSION};

/// Writes [`SegmentRecord`]s to a `.rseg` file in capture order.
///
/// The header's `record_count` is written as `0` on open and patched with
/// the final count when [`SegmentWriter::close`] is called. Writing after
/// close returns an error.
pub struct SegmentWriter {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    record_count: u32,
}

impl SegmentWriter {
    /// Creates a new segment store at `path`, truncating any existing
    /// file. Writes the 9-byte header immediately with `record_count = 0`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&[VERSION])?;
        writer.write_all(&0u32.to_be_bytes())?;

        Ok(Self {
            path,
            writer: Some(writer),
            record_count: 0,
        })
    }

    /// Appends one record, incrementing the running count. Does not write
    /// the patched header — call [`SegmentWriter::close`] for that.
    pub fn write(&mut self, record: &SegmentRecord) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed_error)?;
        record.write_to(writer)?;
        self.record_count += 1;
        Ok(())
    }

    /// Number of records written so far.
    #[must_use]
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Flushes, seeks back to the header, and patches in the final
    /// `record_count`. Subsequent writes fail with a state error.
    pub fn close(mut self) -> io::Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> io::Result<()> {
        let mut writer = self.writer.take().ok_or_else(closed_error)?;
        writer.flush()?;
        let mut file = writer.into_inner().map_err(|e| e.into_error())?;
        file.seek(SeekFrom::Start(RECORD_COUNT_OFFSET))?;
        file.write_all(&self.record_count.to_be_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Path of the segment store being written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SegmentWriter {
    fn drop(&mut self) {
        if self.writer.is_some() {
            // Best-effort: patch the header even if the caller forgot to
            // call close() explicitly.
            let _ = self.finish();
        }
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "segment store writer is closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment_store::reader::SegmentStoreReader;
    use tempfile::tempdir;

    fn sample(edge_id: u32, base_way_id: i64, seg_index: u32) -> SegmentRecord {
        SegmentRecord {
            edge_id,
            base_way_id,
            seg_index,
            flags: 0,
            node_refs: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_write_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rseg");

        let mut writer = SegmentWriter::create(&path).unwrap();
        writer.write(&sample(0, 100, 0)).unwrap();
        writer.write(&sample(1, 100, 1)).unwrap();
        writer.close().unwrap();

        let reader = SegmentStoreReader::open_streaming(&path).unwrap();
        let records: Vec<_> = reader.map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].edge_id, 0);
        assert_eq!(records[1].edge_id, 1);
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rseg");
        let mut writer = SegmentWriter::create(&path).unwrap();
        writer.write(&sample(0, 1, 0)).unwrap();
        // Manually force the closed state rather than calling close(),
        // which consumes self.
        writer.writer = None;
        assert!(writer.write(&sample(1, 1, 1)).is_err());
    }

    #[test]
    fn test_empty_store_is_valid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.rseg");
        SegmentWriter::create(&path).unwrap().close().unwrap();

        let reader = SegmentStoreReader::open_streaming(&path).unwrap();
        assert_eq!(reader.count(), 0);
    }
}
