//! Pipeline-wide tunables shared by every stage.

use crate::error::ValidationError;
use crate::idset::DEFAULT_CHUNK_SIZE;

/// Configuration for the extraction pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Longs per in-memory sort chunk during external sort.
    pub sort_chunk_size: usize,
    /// Max ways sampled when building the tag dictionary pre-pass.
    pub dictionary_sample_cap: usize,
    /// Default barrier-inclusion setting when a stage isn't told
    /// otherwise.
    pub include_barriers_by_default: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sort_chunk_size: DEFAULT_CHUNK_SIZE,
            dictionary_sample_cap: 100_000,
            include_barriers_by_default: false,
        }
    }
}

impl PipelineConfig {
    const MIN_SORT_CHUNK_SIZE: usize = 1_000;

    /// Validates tunables, returning a typed error for out-of-range
    /// values instead of letting a degenerate chunk size silently produce
    /// pathological I/O patterns.
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.sort_chunk_size < Self::MIN_SORT_CHUNK_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "sort_chunk_size must be at least {} (got {})",
                    Self::MIN_SORT_CHUNK_SIZE,
                    self.sort_chunk_size
                ),
            });
        }
        if self.dictionary_sample_cap == 0 {
            return Err(ValidationError::InvalidConfig {
                reason: "dictionary_sample_cap must be nonzero".to_string(),
            });
        }
        Ok(self)
    }
}
