//! H.264 configuration and NAL unit utilities
//!
//! MP4 stores H.264 samples in AVCC format (length-prefixed NAL units) and
//! keeps SPS/PPS out of band in the `avcC` box. Decoders downstream expect
//! Annex B (start code) streams with parameter sets ahead of each keyframe.

use serde::Serialize;

use crate::error::{DemuxError, Result};

/// Annex B start code (4-byte version)
pub const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Parsed AVCDecoderConfigurationRecord
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvcConfig {
    pub profile: u8,
    pub profile_compatibility: u8,
    pub level: u8,
    /// Bytes in each NAL length prefix (1, 2 or 4)
    pub nal_length_size: usize,
    #[serde(skip)]
    pub sps: Vec<Vec<u8>>,
    #[serde(skip)]
    pub pps: Vec<Vec<u8>>,
}

impl AvcConfig {
    /// Parse an `avcC` payload.
    ///
    /// ```text
    /// [0]: version (always 1)
    /// [1]: profile
    /// [2]: profile compat
    /// [3]: level
    /// [4]: 0xFC | (nal_length_size - 1)
    /// [5]: 0xE0 | num_sps
    /// SPS entries (u16 length + data), num_pps (u8), PPS entries
    /// ```
    pub fn parse(record: &[u8]) -> Result<Self> {
        if record.len() < 7 {
            return Err(DemuxError::InvalidAvcConfig(format!(
                "record is {} bytes, need at least 7",
                record.len()
            )));
        }
        if record[0] != 1 {
            return Err(DemuxError::InvalidAvcConfig(format!(
                "unsupported configuration version {}",
                record[0]
            )));
        }

        let nal_length_size = ((record[4] & 0x03) + 1) as usize;
        if nal_length_size == 3 {
            return Err(DemuxError::InvalidAvcConfig("3-byte NAL lengths".into()));
        }

        let num_sps = (record[5] & 0x1F) as usize;
        let mut offset = 6;
        let sps = read_parameter_sets(record, &mut offset, num_sps, "SPS")?;

        let num_pps = *record
            .get(offset)
            .ok_or_else(|| DemuxError::InvalidAvcConfig("missing PPS count".into()))?
            as usize;
        offset += 1;
        let pps = read_parameter_sets(record, &mut offset, num_pps, "PPS")?;

        if sps.is_empty() || pps.is_empty() {
            return Err(DemuxError::InvalidAvcConfig(format!(
                "{} SPS / {} PPS, need at least one of each",
                sps.len(),
                pps.len()
            )));
        }

        Ok(Self {
            profile: record[1],
            profile_compatibility: record[2],
            level: record[3],
            nal_length_size,
            sps,
            pps,
        })
    }

    /// SPS and PPS NALs with start codes, ready to feed to a decoder.
    pub fn annexb_parameter_sets(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(self.parameter_sets_len());
        for nal in self.sps.iter().chain(self.pps.iter()) {
            result.extend_from_slice(&ANNEX_B_START_CODE);
            result.extend_from_slice(nal);
        }
        result
    }

    pub fn parameter_sets_len(&self) -> usize {
        self.sps
            .iter()
            .chain(self.pps.iter())
            .map(|nal| ANNEX_B_START_CODE.len() + nal.len())
            .sum()
    }
}

fn read_parameter_sets(
    record: &[u8],
    offset: &mut usize,
    count: usize,
    what: &str,
) -> Result<Vec<Vec<u8>>> {
    let mut sets = Vec::with_capacity(count);
    for _ in 0..count {
        if *offset + 2 > record.len() {
            return Err(DemuxError::InvalidAvcConfig(format!("truncated {} length", what)));
        }
        let len = u16::from_be_bytes([record[*offset], record[*offset + 1]]) as usize;
        *offset += 2;

        if *offset + len > record.len() {
            return Err(DemuxError::InvalidAvcConfig(format!("truncated {} body", what)));
        }
        sets.push(record[*offset..*offset + len].to_vec());
        *offset += len;
    }
    Ok(sets)
}

/// Convert AVCC format NAL units to Annex B format
///
/// AVCC: [4-byte length][NAL][4-byte length][NAL]...
/// Annex B: [0x00 0x00 0x00 0x01][NAL][0x00 0x00 0x00 0x01][NAL]...
pub fn avcc_to_annexb(data: &[u8], nal_length_size: usize) -> Vec<u8> {
    if data.is_empty() || nal_length_size == 0 || nal_length_size > 4 {
        return data.to_vec();
    }

    let mut result = Vec::with_capacity(data.len() + 64);
    let mut offset = 0;

    while offset + nal_length_size <= data.len() {
        let nal_len = read_be_uint(&data[offset..], nal_length_size);
        offset += nal_length_size;

        if nal_len == 0 || offset + nal_len > data.len() {
            break;
        }

        result.extend_from_slice(&ANNEX_B_START_CODE);
        result.extend_from_slice(&data[offset..offset + nal_len]);
        offset += nal_len;
    }

    result
}

/// Rewrite 4-byte NAL length prefixes to start codes without moving data.
///
/// Returns false if a length runs past the end of the buffer; the NALs
/// before it are already rewritten.
pub fn avcc_to_annexb_in_place(data: &mut [u8]) -> bool {
    let mut offset = 0;
    while offset + 4 <= data.len() {
        let nal_len = read_be_uint(&data[offset..], 4);
        if offset + 4 + nal_len > data.len() {
            return false;
        }
        data[offset..offset + 4].copy_from_slice(&ANNEX_B_START_CODE);
        offset += 4 + nal_len;
    }
    offset == data.len()
}

/// Read big-endian unsigned integer of variable size (1-4 bytes)
fn read_be_uint(data: &[u8], size: usize) -> usize {
    data[..size]
        .iter()
        .fold(0usize, |val, &b| (val << 8) | b as usize)
}
