//! # avdemux core
//!
//! Demultiplexer for flat MP4 files with H.264 video and AAC audio. Parses
//! the box tree from a random-access byte source, indexes both tracks and
//! serves time-ordered access units with seek-to-time.

// ============================================================================
// Core Types
// ============================================================================
pub mod config;
pub mod error;

// ============================================================================
// I/O
// ============================================================================
pub mod buffer;
pub mod reader;

// ============================================================================
// Codecs
// ============================================================================
pub mod aac;
pub mod codec;
pub mod h264_utils;

// ============================================================================
// Container Demuxers
// ============================================================================
pub mod access_unit;
pub mod demuxer;
pub mod mp4;

pub use access_unit::{AccessUnit, AccessUnitSink};
pub use buffer::BufferPool;
pub use config::DemuxerConfig;
pub use demuxer::{ContainerKind, Demuxer};
pub use error::{DemuxError, Result};
pub use mp4::{Mp4Demuxer, TrackKind};
pub use reader::{ByteRangeReader, FileReader, MemoryReader};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
