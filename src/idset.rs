//! Out-of-core construction of sorted, deduplicated id sets.
//!
//! Node-id sets for country-scale extracts run into the hundreds of
//! millions of entries, ruling out an in-memory hash set. This module
//! spills raw id values to disk, sorts them in fixed-size chunks, then
//! merges the chunks with a min-heap that drops duplicates as it goes.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Longs per in-memory sort chunk (`C` in the design: `10^7`, ≈80 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 10_000_000;

/// Appends raw big-endian `i64` values to a spill file. Used by the
/// extract stage to record every `node_refs` entry (or `base_way_id`)
/// seen while scanning the segment store, without deduplicating.
pub struct SpillWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl SpillWriter {
    /// Creates (truncating) a spill file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    /// Appends one id.
    pub fn push(&mut self, id: i64) -> io::Result<()> {
        self.writer.write_all(&id.to_be_bytes())
    }

    /// Appends a slice of ids.
    pub fn push_all(&mut self, ids: &[i64]) -> io::Result<()> {
        for &id in ids {
            self.push(id)?;
        }
        Ok(())
    }

    /// Flushes and returns the spill file's path.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.writer.flush()?;
        Ok(self.path)
    }
}

/// Reads a spill file (or any raw big-endian `i64` file) in fixed-count
/// chunks, sorting each in memory and writing it to its own numbered temp
/// file under `temp_dir`. Returns the sorted chunk file paths in order.
///
/// Deletes all input and produced temp state on error; on success the
/// caller owns the returned chunk files and is responsible for removing
/// them (normally via [`k_way_merge_dedup`] through
/// [`external_sort_unique`]).
fn chunk_sort(
    spill_path: &Path,
    chunk_size: usize,
    temp_dir: &Path,
    stem: &str,
) -> io::Result<Vec<PathBuf>> {
    let mut reader = BufReader::new(File::open(spill_path)?);
    let mut chunk_paths = Vec::new();
    let mut chunk_index = 0usize;
    let mut buf = vec![0u8; 8];

    loop {
        let mut chunk = Vec::with_capacity(chunk_size);
        loop {
            if chunk.len() >= chunk_size {
                break;
            }
            match reader.read_exact(&mut buf) {
                Ok(()) => chunk.push(i64::from_be_bytes(buf.try_into().unwrap())),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
        }
        if chunk.is_empty() {
            break;
        }
        chunk.sort_unstable();

        let chunk_path = temp_dir.join(format!("{stem}.chunk{chunk_index:06}.bin"));
        let mut writer = BufWriter::new(File::create(&chunk_path)?);
        for id in &chunk {
            writer.write_all(&id.to_be_bytes())?;
        }
        writer.flush()?;
        chunk_paths.push(chunk_path);
        chunk_index += 1;
    }

    Ok(chunk_paths)
}

struct ChunkCursor {
    reader: BufReader<File>,
    current: i64,
    exhausted: bool,
}

impl ChunkCursor {
    fn open(path: &Path) -> io::Result<Option<Self>> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut buf = [0u8; 8];
        match reader.read_exact(&mut buf) {
            Ok(()) => Ok(Some(Self {
                reader,
                current: i64::from_be_bytes(buf),
                exhausted: false,
            })),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn advance(&mut self) -> io::Result<()> {
        let mut buf = [0u8; 8];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => self.current = i64::from_be_bytes(buf),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => self.exhausted = true,
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// K-way merges already-sorted chunk files, dropping duplicate values.
/// Returns the strictly ascending, duplicate-free result.
fn k_way_merge_dedup(chunk_paths: &[PathBuf]) -> io::Result<Vec<i64>> {
    let mut cursors = Vec::with_capacity(chunk_paths.len());
    for path in chunk_paths {
        if let Some(cursor) = ChunkCursor::open(path)? {
            cursors.push(cursor);
        }
    }

    let mut heap: BinaryHeap<Reverse<(i64, usize)>> = cursors
        .iter()
        .enumerate()
        .map(|(i, c)| Reverse((c.current, i)))
        .collect();

    let mut result = Vec::new();
    let mut last_emitted: Option<i64> = None;

    while let Some(Reverse((value, cursor_idx))) = heap.pop() {
        if last_emitted != Some(value) {
            result.push(value);
            last_emitted = Some(value);
        }
        let cursor = &mut cursors[cursor_idx];
        cursor.advance()?;
        if !cursor.exhausted {
            heap.push(Reverse((cursor.current, cursor_idx)));
        }
    }

    Ok(result)
}

/// A temp-directory guard that removes everything it tracked on drop,
/// best-effort, mirroring the segment writer's crash-safety posture: a
/// failed cleanup never masks the underlying sort result or error.
struct TempFileGuard {
    paths: Vec<PathBuf>,
}

impl TempFileGuard {
    fn new() -> Self {
        Self { paths: Vec::new() }
    }

    fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        for path in &self.paths {
            if path.exists() {
                let _ = fs::remove_file(path);
            }
        }
    }
}

/// Runs the full spill → chunk-sort → k-way-merge pipeline over an
/// already-written spill file, returning the sorted, deduplicated id
/// array. Removes the spill file and all chunk temp files on every exit
/// path, success or failure.
pub fn external_sort_unique(
    spill_path: impl AsRef<Path>,
    temp_dir: impl AsRef<Path>,
    stem: &str,
    chunk_size: usize,
) -> io::Result<Vec<i64>> {
    let spill_path = spill_path.as_ref();
    let temp_dir = temp_dir.as_ref();

    let mut guard = TempFileGuard::new();
    guard.track(spill_path.to_path_buf());

    let chunk_paths = chunk_sort(spill_path, chunk_size, temp_dir, stem)?;
    for path in &chunk_paths {
        guard.track(path.clone());
    }

    k_way_merge_dedup(&chunk_paths)
}

/// Binary search for `target` in an ascending, deduplicated id array, as
/// produced by [`external_sort_unique`].
#[must_use]
pub fn contains_sorted(haystack: &[i64], target: i64) -> bool {
    haystack.binary_search(&target).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_external_sort_with_duplicates() {
        let dir = tempdir().unwrap();
        let spill_path = dir.path().join("spill.bin");
        let mut writer = SpillWriter::create(&spill_path).unwrap();
        writer.push_all(&[5, 3, 5, 1, 3, 2, 1]).unwrap();
        let spill_path = writer.finish().unwrap();

        let result = external_sort_unique(&spill_path, dir.path(), "test", 3).unwrap();
        assert_eq!(result, vec![1, 2, 3, 5]);
        assert!(!spill_path.exists());
    }

    #[test]
    fn test_external_sort_empty_spill() {
        let dir = tempdir().unwrap();
        let spill_path = dir.path().join("empty.bin");
        let writer = SpillWriter::create(&spill_path).unwrap();
        let spill_path = writer.finish().unwrap();

        let result = external_sort_unique(&spill_path, dir.path(), "empty", 10).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_external_sort_single_chunk() {
        let dir = tempdir().unwrap();
        let spill_path = dir.path().join("spill.bin");
        let mut writer = SpillWriter::create(&spill_path).unwrap();
        writer.push_all(&[10, 9, 8, 7, 10, 9]).unwrap();
        let spill_path = writer.finish().unwrap();

        let result = external_sort_unique(&spill_path, dir.path(), "single", 100).unwrap();
        assert_eq!(result, vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_external_sort_across_many_chunks() {
        let dir = tempdir().unwrap();
        let spill_path = dir.path().join("spill.bin");
        let mut writer = SpillWriter::create(&spill_path).unwrap();
        let values: Vec<i64> = (0..1000).rev().chain(0..1000).collect();
        writer.push_all(&values).unwrap();
        let spill_path = writer.finish().unwrap();

        let result = external_sort_unique(&spill_path, dir.path(), "many", 37).unwrap();
        let expected: Vec<i64> = (0..1000).collect();
        assert_eq!(result, expected);
    }

    #[test]
    fn test_contains_sorted() {
        let haystack = vec![1, 2, 3, 5, 8];
        assert!(contains_sorted(&haystack, 5));
        assert!(!contains_sorted(&haystack, 4));
    }

    #[test]
    fn test_cleanup_removes_chunk_files_even_on_success() {
        let dir = tempdir().unwrap();
        let spill_path = dir.path().join("spill.bin");
        let mut writer = SpillWriter::create(&spill_path).unwrap();
        writer.push_all(&[1, 2, 3, 4, 5, 6]).unwrap();
        let spill_path = writer.finish().unwrap();

        external_sort_unique(&spill_path, dir.path(), "gc", 2).unwrap();

        let leftover: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert!(leftover.is_empty(), "expected no leftover temp files");
    }
}
