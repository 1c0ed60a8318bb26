//! Decoder configuration shared by the MP4 demuxer and access unit readers.

use crate::aac::{AacConfig, ADTS_HEADER_SIZE};
use crate::h264_utils::AvcConfig;
use crate::mp4::track::TrackKind;

/// Codec setup extracted from `avcC` and `esds`, plus the per-AU prefix
/// bookkeeping that depends on it.
#[derive(Debug, Clone, Default)]
pub struct CodecConfig {
    avc: Option<AvcConfig>,
    aac: Option<AacConfig>,
    parameter_sets: Vec<u8>,
}

impl CodecConfig {
    pub fn set_avc(&mut self, avc: AvcConfig) {
        self.parameter_sets = avc.annexb_parameter_sets();
        self.avc = Some(avc);
    }

    pub fn set_aac(&mut self, aac: AacConfig) {
        self.aac = Some(aac);
    }

    pub fn avc(&self) -> Option<&AvcConfig> {
        self.avc.as_ref()
    }

    pub fn aac(&self) -> Option<&AacConfig> {
        self.aac.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.avc.is_some() && self.aac.is_some()
    }

    /// NAL length prefix size of video samples.
    pub fn nal_header_size(&self) -> usize {
        self.avc.as_ref().map_or(4, |avc| avc.nal_length_size)
    }

    /// Annex B SPS/PPS written ahead of each video keyframe.
    pub fn parameter_sets(&self) -> &[u8] {
        &self.parameter_sets
    }

    /// Bytes reserved ahead of the sample payload.
    pub fn prepend_size(&self, kind: TrackKind, is_keyframe: bool) -> usize {
        match kind {
            TrackKind::Audio => ADTS_HEADER_SIZE,
            TrackKind::Video if is_keyframe => self.parameter_sets.len(),
            TrackKind::Video => 0,
        }
    }
}
