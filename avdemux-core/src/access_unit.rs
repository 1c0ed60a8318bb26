//! Access units handed from the demuxer to decoders.

use serde::Serialize;

use crate::buffer::BufferPool;
use crate::codec::CodecConfig;
use crate::error::{DemuxError, Result};
use crate::h264_utils::{avcc_to_annexb, avcc_to_annexb_in_place};
use crate::mp4::track::TrackKind;
use crate::reader::{read_exact_at, ByteRangeReader};

/// One demultiplexed frame: where its bytes live and when it plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessUnit {
    pub kind: TrackKind,
    /// Absolute offset of the sample in the source.
    pub offset: u64,
    pub size: u32,
    /// Bytes written ahead of the sample when it is materialized.
    pub prepend_size: usize,
    /// NAL length prefix size, video only.
    pub nal_header_size: Option<usize>,
    pub is_keyframe: bool,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub end_of_stream: bool,
}

impl AccessUnit {
    /// Terminal unit for a track; `duration_us` is the track duration.
    pub fn end_of_stream(kind: TrackKind, duration_us: i64) -> Self {
        Self {
            kind,
            offset: 0,
            size: 0,
            prepend_size: 0,
            nal_header_size: None,
            is_keyframe: false,
            timestamp_us: duration_us,
            duration_us,
            end_of_stream: true,
        }
    }

    /// Download the sample into a pool buffer behind its prefix.
    ///
    /// Audio gets an ADTS header. Video keyframes get the Annex B SPS/PPS,
    /// and every length-prefixed NAL unit is rewritten to a start code.
    /// The caller returns the buffer to `pool` when done with it.
    pub fn read_payload(
        &self,
        reader: &dyn ByteRangeReader,
        codec: &CodecConfig,
        pool: &BufferPool,
    ) -> Result<Vec<u8>> {
        if self.end_of_stream {
            return Ok(Vec::new());
        }

        let mut buffer = pool.acquire(self.prepend_size + self.size as usize)?;
        if let Err(e) = self.fill(reader, codec, &mut buffer) {
            pool.release(buffer);
            return Err(e);
        }
        Ok(buffer)
    }

    fn fill(&self, reader: &dyn ByteRangeReader, codec: &CodecConfig, buffer: &mut Vec<u8>) -> Result<()> {
        let prepend = self.prepend_size;
        read_exact_at(reader, self.offset, &mut buffer[prepend..])?;

        match self.kind {
            TrackKind::Audio => {
                let aac = codec.aac().ok_or(DemuxError::NotConfigured("no AAC configuration"))?;
                buffer[..prepend].copy_from_slice(&aac.adts_header(self.size as usize)?);
            }
            TrackKind::Video => {
                if prepend > 0 {
                    buffer[..prepend].copy_from_slice(codec.parameter_sets());
                }
                match self.nal_header_size.unwrap_or(4) {
                    4 => {
                        if !avcc_to_annexb_in_place(&mut buffer[prepend..]) {
                            tracing::warn!(
                                "Video sample at {} has a NAL length past its end",
                                self.offset
                            );
                        }
                    }
                    n => {
                        let converted = avcc_to_annexb(&buffer[prepend..], n);
                        buffer.truncate(prepend);
                        buffer.extend_from_slice(&converted);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Consumer of demuxed access units.
pub trait AccessUnitSink {
    fn deliver(&mut self, unit: &AccessUnit, payload: &[u8]);

    fn end_of_stream(&mut self, kind: TrackKind, duration_us: i64);
}
