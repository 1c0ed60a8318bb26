//! Container-independent demuxer interface.

use std::sync::Arc;

use serde::Serialize;

use crate::access_unit::AccessUnit;
use crate::buffer::BufferPool;
use crate::config::DemuxerConfig;
use crate::error::Result;
use crate::mp4::{Mp4Demuxer, TrackKind};
use crate::reader::ByteRangeReader;

/// Bytes read from the start of a source to pick a demuxer.
pub const SNIFF_HEADER_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Mp4,
}

/// What a playback pipeline needs from a container parser.
pub trait Demuxer: Send {
    fn container(&self) -> ContainerKind;

    /// Parse until every track is ready to produce access units.
    fn parse_config(&mut self) -> Result<()>;

    /// Next access unit of `kind`; an end-of-stream unit once exhausted.
    fn next_access_unit(&mut self, kind: TrackKind) -> Result<AccessUnit>;

    fn seek_to(&mut self, time_us: i64) -> Result<()>;

    fn duration_us(&self) -> i64;
}

/// Sniff the start of `reader` and build the demuxer that recognizes it.
/// Returns `Ok(None)` when no supported container matches.
pub fn open(
    reader: Arc<dyn ByteRangeReader>,
    pool: Arc<BufferPool>,
    config: &DemuxerConfig,
) -> Result<Option<Box<dyn Demuxer>>> {
    let mut sniff = [0u8; SNIFF_HEADER_SIZE];
    let got = reader.read_at(0, &mut sniff)?;
    let sniff = &sniff[..got];

    if let Some(mp4) = Mp4Demuxer::construct(reader.clone(), sniff, pool, config)? {
        return Ok(Some(Box::new(mp4)));
    }

    tracing::debug!("No demuxer recognizes the stream ({} header bytes)", got);
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mp4::test_util::Mp4Builder;
    use crate::reader::{FileReader, MemoryReader};
    use std::io::Write;

    fn pool() -> Arc<BufferPool> {
        Arc::new(BufferPool::new(1 << 20, 2))
    }

    #[test]
    fn opens_mp4_from_a_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&Mp4Builder::new().build()).expect("write");

        let reader = FileReader::new(file.reopen().expect("reopen")).expect("reader");
        let mut demuxer = open(Arc::new(reader), pool(), &DemuxerConfig::default())
            .expect("open")
            .expect("mp4");
        assert_eq!(demuxer.container(), ContainerKind::Mp4);
        demuxer.parse_config().expect("parse_config");
        let unit = demuxer.next_access_unit(TrackKind::Audio).expect("audio");
        assert_eq!(unit.timestamp_us, 0);
    }

    #[test]
    fn unknown_stream_is_not_opened() {
        let reader = Arc::new(MemoryReader::new(b"RIFF\x00\x00\x00\x00AVI LIST".to_vec()));
        assert!(open(reader, pool(), &DemuxerConfig::default()).unwrap().is_none());

        let empty = Arc::new(MemoryReader::new(Vec::new()));
        assert!(open(empty, pool(), &DemuxerConfig::default()).unwrap().is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let reader = Arc::new(MemoryReader::new(Mp4Builder::new().build()));
        let config = DemuxerConfig {
            header_window: 8,
            ..DemuxerConfig::default()
        };
        assert!(open(reader, pool(), &config).is_err());
    }
}
