//! MPEG-4 ES_Descriptor parsing for `esds` boxes (ISO/IEC 14496-1 §7.2.6).

use crate::error::{DemuxError, Result};

// Tags for elementary stream description
const ES_DESCRIPTOR_TAG: u8 = 0x03;
const DECODER_CONFIG_TAG: u8 = 0x04;
pub(crate) const DECODER_SPECIFIC_TAG: u8 = 0x05;

/// Fields of interest from an ES_Descriptor tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EsDescriptor {
    pub es_id: u16,
    /// objectTypeIndication from the DecoderConfigDescriptor (0x40 = AAC).
    pub object_type: u8,
    pub decoder_specific_info: Vec<u8>,
}

impl EsDescriptor {
    /// Parse the payload of an `esds` box, after its version/flags word.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut descriptor = EsDescriptor::default();
        find_descriptors(data, &mut descriptor)?;
        Ok(descriptor)
    }
}

fn find_descriptors(data: &[u8], esds: &mut EsDescriptor) -> Result<()> {
    let mut remains = data;

    while remains.len() >= 2 {
        let tag = remains[0];
        let mut pos = 1usize;

        // Size is 7 bits per byte, MSB set on all but the last, up to 4 bytes.
        let mut length = 0usize;
        for _ in 0..4 {
            let byte = *remains
                .get(pos)
                .ok_or_else(|| DemuxError::InvalidDescriptor("truncated descriptor length".into()))?;
            pos += 1;
            length = (length << 7) | (byte & 0x7F) as usize;
            if byte & 0x80 == 0 {
                break;
            }
        }

        let end = pos + length;
        if end > remains.len() {
            return Err(DemuxError::InvalidDescriptor(format!(
                "descriptor 0x{:02x} claims {} bytes, {} available",
                tag,
                length,
                remains.len() - pos
            )));
        }
        let body = &remains[pos..end];

        match tag {
            ES_DESCRIPTOR_TAG => read_es_descriptor(body, esds)?,
            DECODER_CONFIG_TAG => read_decoder_config(body, esds)?,
            DECODER_SPECIFIC_TAG => esds.decoder_specific_info = body.to_vec(),
            _ => tracing::debug!("Skipping descriptor tag 0x{:02x}", tag),
        }

        remains = &remains[end..];
    }

    Ok(())
}

fn read_es_descriptor(data: &[u8], esds: &mut EsDescriptor) -> Result<()> {
    if data.len() < 3 {
        return Err(DemuxError::InvalidDescriptor("ES descriptor shorter than 3 bytes".into()));
    }
    esds.es_id = u16::from_be_bytes([data[0], data[1]]);
    let flags = data[2];
    let mut pos = 3usize;

    // streamDependenceFlag
    if flags & 0x80 != 0 {
        pos += 2;
    }
    // URL_Flag
    if flags & 0x40 != 0 {
        let url_len = *data
            .get(pos)
            .ok_or_else(|| DemuxError::InvalidDescriptor("truncated URL length".into()))?
            as usize;
        pos += 1 + url_len;
    }
    // OCRstreamFlag
    if flags & 0x20 != 0 {
        pos += 2;
    }

    if pos > data.len() {
        return Err(DemuxError::InvalidDescriptor("ES descriptor flags overrun body".into()));
    }
    find_descriptors(&data[pos..], esds)
}

fn read_decoder_config(data: &[u8], esds: &mut EsDescriptor) -> Result<()> {
    // objectTypeIndication, streamType, bufferSizeDB(3), maxBitrate(4), avgBitrate(4)
    const FIXED_FIELDS: usize = 13;
    if data.len() < FIXED_FIELDS {
        return Err(DemuxError::InvalidDescriptor(format!(
            "decoder config is {} bytes, need {}",
            data.len(),
            FIXED_FIELDS
        )));
    }
    esds.object_type = data[0];
    find_descriptors(&data[FIXED_FIELDS..], esds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aac_esds() -> Vec<u8> {
        vec![
            0x03, 0x19, // ES descriptor, 25 bytes
            0x00, 0x01, 0x00, // ES_ID 1, no flags
            0x04, 0x11, // decoder config, 17 bytes
            0x40, 0x15, 0x00, 0x00, 0x00, 0x00, 0x01, 0xF4, 0x00, 0x00, 0x01, 0xF4, 0x00,
            0x05, 0x02, 0x12, 0x10, // decoder specific info
            0x06, 0x01, 0x02, // SL config
        ]
    }

    #[test]
    fn extracts_decoder_specific_info() {
        let esds = EsDescriptor::parse(&aac_esds()).expect("esds");
        assert_eq!(esds.es_id, 1);
        assert_eq!(esds.object_type, 0x40);
        assert_eq!(esds.decoder_specific_info, vec![0x12, 0x10]);
    }

    #[test]
    fn accepts_multi_byte_lengths() {
        let mut data = vec![0x03, 0x80, 0x80, 0x80, 0x19];
        data.extend_from_slice(&aac_esds()[2..]);
        let esds = EsDescriptor::parse(&data).expect("esds");
        assert_eq!(esds.decoder_specific_info, vec![0x12, 0x10]);
    }

    #[test]
    fn rejects_overlong_descriptor() {
        let err = EsDescriptor::parse(&[0x03, 0x40, 0x00, 0x01]).unwrap_err();
        assert!(matches!(err, DemuxError::InvalidDescriptor(_)));
    }
}
