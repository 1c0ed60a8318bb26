//! AAC AudioSpecificConfig and ADTS framing.
//!
//! MP4 carries raw AAC frames; the two-byte AudioSpecificConfig from `esds`
//! is turned into a 7-byte ADTS header that is written ahead of each frame.

use serde::Serialize;

use crate::error::{DemuxError, Result};

/// ADTS header without CRC.
pub const ADTS_HEADER_SIZE: usize = 7;

/// `frame_length` is 13 bits and counts the header.
pub const ADTS_MAX_FRAME_LENGTH: usize = (1 << 13) - 1;

const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AacConfig {
    pub object_type: u8,
    pub sampling_frequency_index: u8,
    pub sampling_frequency: u32,
    pub channel_configuration: u8,
}

impl AacConfig {
    /// Decode the leading two bytes of an AudioSpecificConfig:
    /// 5 bits object type, 4 bits frequency index, 4 bits channel config.
    pub fn from_bytes(b0: u8, b1: u8) -> Result<Self> {
        let object_type = b0 >> 3;
        let sampling_frequency_index = ((b0 & 0x07) << 1) | (b1 >> 7);
        let channel_configuration = (b1 >> 3) & 0x0F;

        if object_type == 0 {
            return Err(DemuxError::InvalidDescriptor("AAC object type 0".into()));
        }
        let sampling_frequency = SAMPLING_FREQUENCIES
            .get(sampling_frequency_index as usize)
            .copied()
            .ok_or_else(|| {
                DemuxError::InvalidDescriptor(format!(
                    "unsupported sampling frequency index {}",
                    sampling_frequency_index
                ))
            })?;

        Ok(Self {
            object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration,
        })
    }

    /// ADTS header for a frame carrying `payload_size` bytes of raw AAC.
    /// Frames too long for the 13-bit length field are refused.
    pub fn adts_header(&self, payload_size: usize) -> Result<[u8; ADTS_HEADER_SIZE]> {
        let frame_length = payload_size.saturating_add(ADTS_HEADER_SIZE);
        if frame_length > ADTS_MAX_FRAME_LENGTH {
            return Err(DemuxError::FrameTooLarge {
                size: frame_length,
                limit: ADTS_MAX_FRAME_LENGTH,
            });
        }
        // ADTS only has room for AAC Main/LC/SSR/LTP; SBR and PS streams are
        // signalled as LC and upsampled implicitly by the decoder.
        let profile = match self.object_type {
            1..=4 => self.object_type - 1,
            _ => 1,
        };
        let channels = self.channel_configuration;

        Ok([
            0xFF,
            0xF1,
            (profile << 6) | (self.sampling_frequency_index << 2) | ((channels >> 2) & 0x01),
            ((channels & 0x03) << 6) | ((frame_length >> 11) & 0x03) as u8,
            ((frame_length >> 3) & 0xFF) as u8,
            (((frame_length & 0x07) << 5) as u8) | 0x1F,
            0xFC,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_lc_stereo_44100() {
        // object type 2 (LC), index 4 (44100), 2 channels
        let config = AacConfig::from_bytes(0x12, 0x10).expect("config");
        assert_eq!(config.object_type, 2);
        assert_eq!(config.sampling_frequency_index, 4);
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channel_configuration, 2);
    }

    #[test]
    fn rejects_explicit_frequency() {
        // index 15 needs 24 more bits than two bytes carry
        assert!(AacConfig::from_bytes(0x17, 0x90).is_err());
    }

    #[test]
    fn builds_adts_header() {
        let config = AacConfig::from_bytes(0x12, 0x10).unwrap();
        let header = config.adts_header(100).unwrap();
        // frame length 107 = 0b000_0000_1101_011
        assert_eq!(header, [0xFF, 0xF1, 0x50, 0x80, 0x0D, 0x7F, 0xFC]);
    }

    #[test]
    fn adts_frame_length_is_thirteen_bits() {
        let config = AacConfig::from_bytes(0x12, 0x10).unwrap();
        let largest = config.adts_header(ADTS_MAX_FRAME_LENGTH - ADTS_HEADER_SIZE).unwrap();
        // 8191 in every frame_length bit
        assert_eq!(&largest[3..6], &[0x83, 0xFF, 0xFF]);

        let err = config.adts_header(8185).unwrap_err();
        assert!(matches!(err, DemuxError::FrameTooLarge { size: 8192, limit: 8191 }));
    }
}
