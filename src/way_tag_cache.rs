//! Dictionary-compressed random-access map from OSM way id to its
//! whitelisted tags.
//!
//! OSM `key=value` pairs are heavily skewed (`highway=residential` appears
//! far more often than any specific `name=...`), so an optional pre-pass
//! builds a frequency-ordered dictionary and tags that hit it are encoded
//! as a 2-byte index instead of their literal bytes.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{FormatError, PipelineError, PipelineResult};

/// Tag keys retained at extract time; everything else is discarded.
pub const TAG_WHITELIST: &[&str] = &[
    "highway", "name", "ref", "surface", "maxspeed", "oneway", "bicycle", "foot", "lanes",
    "cycleway", "sidewalk", "lit", "access",
];

/// Tag keys retained on the derived-PBF output way, a subset of
/// [`TAG_WHITELIST`].
pub const OUTPUT_TAG_WHITELIST: &[&str] = &[
    "highway", "name", "ref", "surface", "maxspeed", "oneway", "bicycle", "foot",
];

const MAGIC: &[u8; 4] = b"RWAY";
const VERSION: u8 = 1;
const INDEX_ENTRY_LEN: usize = 12;
const MAX_DICT_ENTRIES: usize = 32_000;
const SAMPLE_LIMIT: usize = 100_000;

/// Returns true if `key` survives extraction-time filtering.
#[must_use]
pub fn is_whitelisted(key: &str) -> bool {
    TAG_WHITELIST.contains(&key)
}

/// A frozen, frequency-ordered `"key=value"` dictionary, built by an
/// optional sampling pre-pass. Tags that hit the dictionary are encoded
/// by 16-bit index; everything else is encoded literally.
#[derive(Debug, Default, Clone)]
pub struct TagDictionary {
    entries: Vec<String>,
    index_of: HashMap<String, u16>,
}

impl TagDictionary {
    /// Builds a dictionary from a sample of `(way_id, tags)` pairs: at
    /// most [`SAMPLE_LIMIT`] ways are inspected, and the
    /// `min(unique, 32_000)` most frequent `"key=value"` pairs among
    /// whitelisted tags become the dictionary, in frequency-descending
    /// order.
    pub fn build_from_sample<'a, I>(ways: I) -> Self
    where
        I: IntoIterator<Item = &'a HashMap<String, String>>,
    {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for tags in ways.into_iter().take(SAMPLE_LIMIT) {
            for (key, value) in tags {
                if !is_whitelisted(key) {
                    continue;
                }
                *counts.entry(format!("{key}={value}")).or_insert(0) += 1;
            }
        }

        let mut pairs: Vec<(String, u64)> = counts.into_iter().collect();
        pairs.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        pairs.truncate(MAX_DICT_ENTRIES);

        let entries: Vec<String> = pairs.into_iter().map(|(kv, _)| kv).collect();
        let index_of = entries
            .iter()
            .enumerate()
            .map(|(i, kv)| (kv.clone(), i as u16))
            .collect();

        Self { entries, index_of }
    }

    fn lookup(&self, kv: &str) -> Option<u16> {
        self.index_of.get(kv).copied()
    }

    /// Number of entries in the dictionary.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the dictionary has no entries (no pre-pass was run).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Writes the way-tag cache. `put` is called once per way, against the
/// frozen dictionary passed to [`WayTagCacheWriter::create`]; `finish`
/// concatenates header + dictionary + temp-index + temp-data into the
/// final file.
pub struct WayTagCacheWriter {
    final_path: PathBuf,
    index_path: PathBuf,
    data_path: PathBuf,
    index_writer: BufWriter<File>,
    data_writer: BufWriter<File>,
    dictionary: TagDictionary,
    count: u32,
    next_offset: u32,
}

impl WayTagCacheWriter {
    /// Creates a new way-tag cache at `path`, encoding against
    /// `dictionary` (pass [`TagDictionary::default`] to disable
    /// compression).
    pub fn create(path: impl AsRef<Path>, dictionary: TagDictionary) -> io::Result<Self> {
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
            dictionary,
            count: 0,
            next_offset: 0,
        })
    }

    /// Encodes and appends one way's whitelisted tags.
    pub fn put(&mut self, way_id: i64, tags: &HashMap<String, String>) -> io::Result<()> {
        let whitelisted: Vec<(&String, &String)> =
            tags.iter().filter(|(k, _)| is_whitelisted(k)).collect();

        let mut blob = Vec::new();
        let tag_count = u8::try_from(whitelisted.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "too many tags on one way"))?;
        blob.push(tag_count);

        for (key, value) in whitelisted {
            let kv = format!("{key}={value}");
            if let Some(index) = self.dictionary.lookup(&kv) {
                blob.push(0);
                blob.extend_from_slice(&index.to_be_bytes());
            } else {
                blob.push(1);
                let key_bytes = key.as_bytes();
                let val_bytes = value.as_bytes();
                blob.extend_from_slice(&(key_bytes.len() as u16).to_be_bytes());
                blob.extend_from_slice(key_bytes);
                blob.extend_from_slice(&(val_bytes.len() as u16).to_be_bytes());
                blob.extend_from_slice(val_bytes);
            }
        }

        self.index_writer.write_all(&way_id.to_be_bytes())?;
        self.index_writer.write_all(&self.next_offset.to_be_bytes())?;
        self.data_writer.write_all(&blob)?;

        self.count += 1;
        self.next_offset += blob.len() as u32;
        Ok(())
    }

    /// Concatenates header, dictionary, index, and data into the final
    /// file, then removes the temp files.
    pub fn finish(mut self) -> io::Result<PathBuf> {
        self.index_writer.flush()?;
        self.data_writer.flush()?;
        drop(self.index_writer);
        drop(self.data_writer);

        let mut out = BufWriter::new(File::create(&self.final_path)?);
        out.write_all(MAGIC)?;
        out.write_all(&[VERSION])?;
        out.write_all(&self.count.to_be_bytes())?;
        let dict_size = u16::try_from(self.dictionary.entries.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "dictionary too large"))?;
        out.write_all(&dict_size.to_be_bytes())?;
        for entry in &self.dictionary.entries {
            out.write_all(entry.as_bytes())?;
            out.write_all(&[0u8])?;
        }

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

impl Drop for WayTagCacheWriter {
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

/// Read-only, fully-decoded way-tag cache: maps file, reads the
/// dictionary, then decodes every blob into an in-memory
/// `way_id -> tags` map.
pub struct WayTagCacheReader {
    tags: HashMap<i64, HashMap<String, String>>,
}

impl WayTagCacheReader {
    /// Opens and fully decodes a way-tag cache at `path`.
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < 11 {
            return Err(truncated(path, "header"));
        }
        if &mmap[0..4] != MAGIC {
            return Err(bad_magic(path, &mmap[0..4]));
        }
        if mmap[4] != VERSION {
            return Err(bad_version(path, mmap[4]));
        }
        let way_count = u32::from_be_bytes(mmap[5..9].try_into().unwrap()) as usize;
        let dict_size = u16::from_be_bytes(mmap[9..11].try_into().unwrap()) as usize;

        let mut cursor = 11usize;
        let mut dictionary = Vec::with_capacity(dict_size);
        for _ in 0..dict_size {
            let start = cursor;
            while mmap.get(cursor).copied() != Some(0) {
                cursor += 1;
                if cursor >= mmap.len() {
                    return Err(truncated(path, "dictionary"));
                }
            }
            let entry = String::from_utf8_lossy(&mmap[start..cursor]).into_owned();
            dictionary.push(entry);
            cursor += 1;
        }

        let index_base = cursor;
        let data_base = index_base + way_count * INDEX_ENTRY_LEN;
        if mmap.len() < data_base {
            return Err(truncated(path, "index section"));
        }

        let mut tags = HashMap::with_capacity(way_count);
        for i in 0..way_count {
            let entry_start = index_base + i * INDEX_ENTRY_LEN;
            let way_id = i64::from_be_bytes(mmap[entry_start..entry_start + 8].try_into().unwrap());
            let offset = u32::from_be_bytes(mmap[entry_start + 8..entry_start + 12].try_into().unwrap());
            let mut pos = data_base + offset as usize;

            let tag_count = *mmap.get(pos).ok_or_else(|| truncated(path, "tag blob"))?;
            pos += 1;
            let mut way_tags = HashMap::with_capacity(tag_count as usize);
            for _ in 0..tag_count {
                let tag_type = *mmap.get(pos).ok_or_else(|| truncated(path, "tag blob"))?;
                pos += 1;
                match tag_type {
                    0 => {
                        let index = u16::from_be_bytes(
                            mmap[pos..pos + 2].try_into().map_err(|_| truncated(path, "dict index"))?,
                        );
                        pos += 2;
                        if let Some(kv) = dictionary.get(index as usize) {
                            if let Some((key, value)) = kv.split_once('=') {
                                way_tags.insert(key.to_string(), value.to_string());
                            }
                        }
                    }
                    1 => {
                        let key_len = u16::from_be_bytes(
                            mmap[pos..pos + 2].try_into().map_err(|_| truncated(path, "key len"))?,
                        ) as usize;
                        pos += 2;
                        let key = String::from_utf8_lossy(&mmap[pos..pos + key_len]).into_owned();
                        pos += key_len;
                        let val_len = u16::from_be_bytes(
                            mmap[pos..pos + 2].try_into().map_err(|_| truncated(path, "value len"))?,
                        ) as usize;
                        pos += 2;
                        let value = String::from_utf8_lossy(&mmap[pos..pos + val_len]).into_owned();
                        pos += val_len;
                        way_tags.insert(key, value);
                    }
                    other => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("unknown tag encoding type {other} in {}", path.display()),
                        )
                        .into())
                    }
                }
            }
            tags.insert(way_id, way_tags);
        }

        Ok(Self { tags })
    }

    /// Looks up the whitelisted tags for `way_id`.
    #[must_use]
    pub fn get(&self, way_id: i64) -> Option<&HashMap<String, String>> {
        self.tags.get(&way_id)
    }

    /// Number of ways in this cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// True if the cache holds no ways.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

fn bad_magic(path: &Path, found: &[u8]) -> PipelineError {
    FormatError::BadMagic {
        path: path.to_path_buf(),
        expected: MAGIC.as_slice(),
        found: found.to_vec(),
    }
    .into()
}

fn bad_version(path: &Path, found: u8) -> PipelineError {
    FormatError::UnsupportedVersion {
        path: path.to_path_buf(),
        expected: VERSION,
        found,
    }
    .into()
}

fn truncated(path: &Path, detail: &str) -> PipelineError {
    FormatError::TruncatedRecord {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    }
    .into()
}

/// Writes the legacy text way-tag cache: one `way_id<TAB>k=v,k=v,...` line
/// per way, values escaped the same way the relation cache escapes them.
pub fn write_text_cache(
    path: impl AsRef<Path>,
    ways: &[(i64, HashMap<String, String>)],
) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (way_id, tags) in ways {
        let mut whitelisted: Vec<(&String, &String)> =
            tags.iter().filter(|(k, _)| is_whitelisted(k)).collect();
        whitelisted.sort_by(|a, b| a.0.cmp(b.0));
        let rendered: Vec<String> = whitelisted
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect();
        writeln!(writer, "{way_id}\t{}", rendered.join(","))?;
    }
    writer.flush()
}

/// Reads the legacy text way-tag cache into memory.
pub fn read_text_cache(path: impl AsRef<Path>) -> io::Result<HashMap<i64, HashMap<String, String>>> {
    let path = path.as_ref();
    let reader = BufReader::new(OpenOptions::new().read(true).open(path)?);
    let mut out = HashMap::new();
    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let (id_part, tags_part) = line.split_once('\t').ok_or_else(|| malformed(path, &line))?;
        let way_id: i64 = id_part.parse().map_err(|_| malformed(path, &line))?;
        let mut tags = HashMap::new();
        if !tags_part.is_empty() {
            for pair in split_unescaped(tags_part, ',') {
                let (key, value) = pair.split_once('=').ok_or_else(|| malformed(path, &line))?;
                tags.insert(unescape(key), unescape(value));
            }
        }
        out.insert(way_id, tags);
    }
    Ok(out)
}

fn malformed(path: &Path, line: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("malformed way-tag cache line in {}: {line:?}", path.display()),
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
