//! Demuxer configuration.

use serde::{Deserialize, Serialize};

use crate::error::{DemuxError, Result};

/// Largest fixed prefix any box handler reads from the header window:
/// a 16-byte extended box header plus the 32-byte version 1 `mdhd` prefix.
pub const MIN_HEADER_WINDOW: usize = 16 + 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxerConfig {
    /// Entries kept resident per sample sub-table before paging.
    pub table_cache_entries: u32,
    /// Bytes downloaded at the cursor to decode one box header.
    pub header_window: usize,
    /// Largest single buffer the arena will hand out.
    pub max_buffer_bytes: usize,
    /// Buffers pre-seeded in the arena.
    pub pool_buffers: usize,
}

impl Default for DemuxerConfig {
    fn default() -> Self {
        Self {
            table_cache_entries: 2048 * 2048,
            header_window: 64,
            max_buffer_bytes: 64 * 1024 * 1024,
            pool_buffers: 4,
        }
    }
}

impl DemuxerConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| DemuxError::Config(format!("JSON error: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.header_window < MIN_HEADER_WINDOW {
            return Err(DemuxError::Config(format!(
                "header_window {} is below the {} bytes box handlers read",
                self.header_window, MIN_HEADER_WINDOW
            )));
        }
        if self.table_cache_entries == 0 {
            return Err(DemuxError::Config("table_cache_entries must be non-zero".into()));
        }
        if self.max_buffer_bytes == 0 {
            return Err(DemuxError::Config("max_buffer_bytes must be non-zero".into()));
        }
        Ok(())
    }
}
