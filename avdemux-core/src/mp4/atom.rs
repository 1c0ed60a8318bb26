//! MP4 box header parsing.

use std::fmt;

use bytes::Buf;

use crate::error::{DemuxError, Result};

/// Four character box type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const fn new(code: &[u8; 4]) -> Self {
        FourCC(*code)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{:02x}", b)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self)
    }
}

pub const FTYP: FourCC = FourCC::new(b"ftyp");
pub const MOOV: FourCC = FourCC::new(b"moov");
pub const MVHD: FourCC = FourCC::new(b"mvhd");
pub const TRAK: FourCC = FourCC::new(b"trak");
pub const TKHD: FourCC = FourCC::new(b"tkhd");
pub const MDIA: FourCC = FourCC::new(b"mdia");
pub const MDHD: FourCC = FourCC::new(b"mdhd");
pub const HDLR: FourCC = FourCC::new(b"hdlr");
pub const MINF: FourCC = FourCC::new(b"minf");
pub const VMHD: FourCC = FourCC::new(b"vmhd");
pub const SMHD: FourCC = FourCC::new(b"smhd");
pub const DINF: FourCC = FourCC::new(b"dinf");
pub const DREF: FourCC = FourCC::new(b"dref");
pub const STBL: FourCC = FourCC::new(b"stbl");
pub const STSD: FourCC = FourCC::new(b"stsd");
pub const AVC1: FourCC = FourCC::new(b"avc1");
pub const AVCC: FourCC = FourCC::new(b"avcC");
pub const MP4A: FourCC = FourCC::new(b"mp4a");
pub const ESDS: FourCC = FourCC::new(b"esds");
pub const STTS: FourCC = FourCC::new(b"stts");
pub const CTTS: FourCC = FourCC::new(b"ctts");
pub const STSC: FourCC = FourCC::new(b"stsc");
pub const STSZ: FourCC = FourCC::new(b"stsz");
pub const STCO: FourCC = FourCC::new(b"stco");
pub const CO64: FourCC = FourCC::new(b"co64");
pub const STSS: FourCC = FourCC::new(b"stss");

/// Smallest legal box: 32-bit size plus fourCC.
pub const BOX_HEADER_SIZE: u64 = 8;
/// Box header carrying a 64-bit extended size.
pub const EXTENDED_BOX_HEADER_SIZE: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Absolute offset of the first header byte.
    pub offset: u64,
    /// Total box size including the header.
    pub size: u64,
    pub box_type: FourCC,
    pub header_size: u64,
}

impl BoxHeader {
    pub fn body_offset(&self) -> u64 {
        self.offset + self.header_size
    }

    pub fn body_size(&self) -> u64 {
        self.size - self.header_size
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Decode the box header at the start of `window`, which was read from
/// absolute `offset`. A size of 0 extends the box to end of file.
pub fn parse_box_header(window: &[u8], offset: u64, file_size: u64) -> Result<BoxHeader> {
    if (window.len() as u64) < BOX_HEADER_SIZE {
        return Err(DemuxError::ShortRead {
            offset,
            wanted: BOX_HEADER_SIZE as usize,
            got: window.len(),
        });
    }
    let mut cursor = window;
    let size = cursor.get_u32() as u64;
    let mut box_type = [0u8; 4];
    cursor.copy_to_slice(&mut box_type);
    let box_type = FourCC(box_type);

    let (size, header_size) = match size {
        1 => {
            if cursor.remaining() < 8 {
                return Err(DemuxError::ShortRead {
                    offset,
                    wanted: EXTENDED_BOX_HEADER_SIZE as usize,
                    got: window.len(),
                });
            }
            (cursor.get_u64(), EXTENDED_BOX_HEADER_SIZE)
        }
        0 => (file_size.saturating_sub(offset), BOX_HEADER_SIZE),
        n => (n, BOX_HEADER_SIZE),
    };

    // A box can never be smaller than its own header.
    if size < header_size {
        return Err(DemuxError::invalid_box(
            box_type,
            offset,
            format!("size {} is less than header size {}", size, header_size),
        ));
    }
    if offset.checked_add(size).is_none() {
        return Err(DemuxError::invalid_box(
            box_type,
            offset,
            format!("size {} runs past the 64-bit offset range", size),
        ));
    }

    Ok(BoxHeader {
        offset,
        size,
        box_type,
        header_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_box_header() {
        let data = b"\x00\x00\x00\x10ftyp";
        let header = parse_box_header(data, 0, 100).expect("header");
        assert_eq!(header.size, 16);
        assert_eq!(header.box_type, FTYP);
        assert_eq!(header.header_size, 8);
        assert_eq!(header.body_offset(), 8);
        assert_eq!(header.body_size(), 8);
    }

    #[test]
    fn parses_extended_box_header() {
        let data = b"\x00\x00\x00\x01mdat\x00\x00\x00\x00\x00\x00\x00\x20";
        let header = parse_box_header(data, 40, 100).expect("header");
        assert_eq!(header.size, 32);
        assert_eq!(header.box_type, FourCC::new(b"mdat"));
        assert_eq!(header.header_size, 16);
        assert_eq!(header.body_offset(), 56);
    }

    #[test]
    fn rejects_too_small_box() {
        let data = b"\x00\x00\x00\x07free";
        let err = parse_box_header(data, 0, 100).unwrap_err();
        assert!(matches!(err, DemuxError::InvalidBox { .. }));
    }

    #[test]
    fn rejects_extended_size_below_header() {
        let data = b"\x00\x00\x00\x01mdat\x00\x00\x00\x00\x00\x00\x00\x0c";
        assert!(parse_box_header(data, 0, 100).is_err());
    }

    #[test]
    fn rejects_extended_size_past_offset_range() {
        let mut data = b"\x00\x00\x00\x01free".to_vec();
        data.extend_from_slice(&u64::MAX.to_be_bytes());
        let err = parse_box_header(&data, 16, 100).unwrap_err();
        assert!(matches!(err, DemuxError::InvalidBox { offset: 16, .. }));

        data[8..16].copy_from_slice(&(u64::MAX - 16).to_be_bytes());
        assert!(parse_box_header(&data, 16, 100).is_ok());
        assert!(parse_box_header(&data, 32, 100).is_err());
    }

    #[test]
    fn zero_size_extends_to_end_of_file() {
        let data = b"\x00\x00\x00\x00mdat";
        let header = parse_box_header(data, 24, 124).expect("header");
        assert_eq!(header.size, 100);
        assert_eq!(header.end(), 124);
    }

    #[test]
    fn short_window_is_a_short_read() {
        let err = parse_box_header(b"\x00\x00\x00", 5, 8).unwrap_err();
        assert!(matches!(err, DemuxError::ShortRead { offset: 5, .. }));
    }

    #[test]
    fn fourcc_display_escapes_binary() {
        assert_eq!(MP4A.to_string(), "mp4a");
        assert_eq!(FourCC([0, b'a', b'b', b'c']).to_string(), "\\x00abc");
    }
}
