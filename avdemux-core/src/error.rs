//! Demuxer error types.

use thiserror::Error;

use crate::mp4::atom::FourCC;

pub type Result<T> = std::result::Result<T, DemuxError>;

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u64, wanted: usize, got: usize },
    #[error("Invalid {fourcc} box at offset {offset}: {reason}")]
    InvalidBox {
        fourcc: FourCC,
        offset: u64,
        reason: String,
    },
    #[error("Truncated {fourcc} box: need {needed} bytes, have {available}")]
    Truncated {
        fourcc: FourCC,
        needed: u64,
        available: u64,
    },
    #[error("Unsupported {fourcc} version {version}")]
    UnsupportedVersion { fourcc: FourCC, version: u16 },
    #[error("Zero timescale in {0} box")]
    ZeroTimescale(FourCC),
    #[error("Missing decoder configuration: {0}")]
    MissingDecoderConfig(&'static str),
    #[error("Invalid AVC configuration record: {0}")]
    InvalidAvcConfig(String),
    #[error("Invalid ES descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("Sample table inconsistency: {0}")]
    SampleTable(String),
    #[error("Sample {index} out of range (track has {count} samples)")]
    SampleOutOfRange { index: u32, count: u32 },
    #[error("Buffer allocation of {requested} bytes refused (limit {limit})")]
    Allocation { requested: usize, limit: usize },
    #[error("Frame of {size} bytes does not fit a {limit}-byte framing limit")]
    FrameTooLarge { size: usize, limit: usize },
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Demuxer not configured: {0}")]
    NotConfigured(&'static str),
}

impl DemuxError {
    pub(crate) fn invalid_box(fourcc: FourCC, offset: u64, reason: impl Into<String>) -> Self {
        DemuxError::InvalidBox {
            fourcc,
            offset,
            reason: reason.into(),
        }
    }

    /// True for failures that mean the source is malformed or unreadable, as
    /// opposed to caller misuse or configuration problems.
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            DemuxError::Io(_)
                | DemuxError::ShortRead { .. }
                | DemuxError::InvalidBox { .. }
                | DemuxError::Truncated { .. }
                | DemuxError::UnsupportedVersion { .. }
                | DemuxError::ZeroTimescale(_)
                | DemuxError::MissingDecoderConfig(_)
                | DemuxError::InvalidAvcConfig(_)
                | DemuxError::InvalidDescriptor(_)
                | DemuxError::SampleTable(_)
                | DemuxError::FrameTooLarge { .. }
        )
    }
}
