//! The segment store (SS): an append-only binary log of [`SegmentRecord`]s
//! written by a capture run and consumed by every later stage.
//!
//! ```text
//! +--------+---------+----------------+------------------+-----+
//! | "RSEG" | version |  record_count  |     record 0     | ... |
//! |  4B    |   1B    |   4B (BE u32)  |  (variable len)   |     |
//! +--------+---------+----------------+------------------+-----+
//! ```
//!
//! `record_count` is written as `0` when the file is created and patched in
//! place once writing finishes, so a store left with the placeholder count
//! after a crash is recognizable as incomplete.

mod record;
mod reader;
mod writer;

pub use record::{SegmentRecord, BARRIER_FLAG};
pub use reader::{IndexedSegmentStoreReader, SegmentStoreReader};
pub use writer::SegmentWriter;

pub(crate) const MAGIC: &[u8; 4] = b"RSEG";
pub(crate) const VERSION: u8 = 1;
pub(crate) const HEADER_LEN: u64 = 9;
pub(crate) const RECORD_COUNT_OFFSET: u64 = 5;
