//! ISO-BMFF ("MP4") container support for non-fragmented files carrying
//! H.264 video and AAC audio.

pub mod atom;
pub mod demuxer;
pub mod descriptor;
pub mod parser;
pub mod sample_table;
pub mod table_cache;
pub mod track;

#[cfg(test)]
pub(crate) mod test_util;

pub use demuxer::{Mp4Demuxer, TrackInfo};
pub use sample_table::{SampleInfo, SampleTableIndex};
pub use track::TrackKind;
