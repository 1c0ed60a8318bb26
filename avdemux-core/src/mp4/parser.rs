//! Incremental MP4 box walker.
//!
//! The box tree is flattened: one cursor moves forward through the file,
//! stepping into containers (past their header only) and over everything
//! else. Each [`AtomWalker::step`] handles exactly one box and always moves
//! the cursor forward, so configuration parsing terminates on any input.

use std::sync::Arc;

use bytes::Buf;

use crate::aac::AacConfig;
use crate::buffer::BufferPool;
use crate::codec::CodecConfig;
use crate::config::DemuxerConfig;
use crate::error::{DemuxError, Result};
use crate::h264_utils::AvcConfig;
use crate::mp4::atom::*;
use crate::mp4::descriptor::EsDescriptor;
use crate::mp4::sample_table::SampleTableIndex;
use crate::mp4::track::{HandlerType, MediaTiming, TrackKind, TrakState};
use crate::reader::{read_exact_at, ByteRangeReader};

/// Sample entry fields ahead of the nested boxes of `avc1`.
const AVC1_SKIP: u64 = 78;
/// `stsd` version/flags and entry count.
const STSD_SKIP: u64 = 8;
/// Full box version/flags word.
const FULL_BOX_HEADER: u64 = 4;
/// `mp4a` bytes before nested boxes, by sound description version.
const MP4A_SIZES: [u64; 3] = [28, 44, 64];

/// Everything configuration parsing extracts from the movie.
pub struct MovieState {
    pub audio: SampleTableIndex,
    pub video: SampleTableIndex,
    pub codec: CodecConfig,
    pub audio_timing: Option<MediaTiming>,
    pub video_timing: Option<MediaTiming>,
    pub duration_us: i64,
}

impl MovieState {
    pub fn new(reader: Arc<dyn ByteRangeReader>) -> Self {
        Self {
            audio: SampleTableIndex::new(TrackKind::Audio, reader.clone()),
            video: SampleTableIndex::new(TrackKind::Video, reader),
            codec: CodecConfig::default(),
            audio_timing: None,
            video_timing: None,
            duration_us: 0,
        }
    }

    pub fn index(&self, kind: TrackKind) -> &SampleTableIndex {
        match kind {
            TrackKind::Audio => &self.audio,
            TrackKind::Video => &self.video,
        }
    }

    pub fn index_mut(&mut self, kind: TrackKind) -> &mut SampleTableIndex {
        match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        }
    }

    pub fn timing(&self, kind: TrackKind) -> Option<MediaTiming> {
        match kind {
            TrackKind::Audio => self.audio_timing,
            TrackKind::Video => self.video_timing,
        }
    }

    fn commit_timing(&mut self, kind: TrackKind, timing: MediaTiming) {
        tracing::debug!(
            "{:?} track: timescale {} Hz, duration {} us",
            kind,
            timing.timescale_hz,
            timing.duration_us()
        );
        match kind {
            TrackKind::Audio => self.audio_timing = Some(timing),
            TrackKind::Video => self.video_timing = Some(timing),
        }
    }

    /// Both codec configs, both track timings and both sample indices.
    pub fn is_complete(&self) -> bool {
        self.codec.is_complete()
            && self.audio_timing.is_some()
            && self.video_timing.is_some()
            && self.audio.is_complete()
            && self.video.is_complete()
    }
}

pub struct AtomWalker {
    reader: Arc<dyn ByteRangeReader>,
    pool: Arc<BufferPool>,
    cache_capacity: u32,
    atom_offset: u64,
    trak: TrakState,
    trak_end: Option<u64>,
    /// Type of the last box the cursor stepped over or into.
    last_box: FourCC,
    window: Vec<u8>,
}

impl AtomWalker {
    /// Start walking just past the `ftyp` box.
    pub fn new(
        reader: Arc<dyn ByteRangeReader>,
        pool: Arc<BufferPool>,
        ftyp_size: u64,
        config: &DemuxerConfig,
    ) -> Self {
        Self {
            reader,
            pool,
            cache_capacity: config.table_cache_entries,
            atom_offset: ftyp_size,
            trak: TrakState::default(),
            trak_end: None,
            last_box: FTYP,
            window: vec![0u8; config.header_window],
        }
    }

    pub fn offset(&self) -> u64 {
        self.atom_offset
    }

    /// Parse the box at the cursor and advance past it (or into it).
    pub fn step(&mut self, movie: &mut MovieState) -> Result<()> {
        let file_size = self.reader.file_size();
        if self.atom_offset >= file_size {
            return Err(DemuxError::Truncated {
                fourcc: self.last_box,
                needed: self.atom_offset.saturating_add(BOX_HEADER_SIZE),
                available: file_size,
            });
        }

        let mut window = std::mem::take(&mut self.window);
        let result = self.step_with(&mut window, file_size, movie);
        self.window = window;
        let (box_type, next) = result?;

        if next <= self.atom_offset {
            return Err(DemuxError::invalid_box(
                box_type,
                self.atom_offset,
                format!("next box offset {} does not move past {}", next, self.atom_offset),
            ));
        }
        self.last_box = box_type;
        self.atom_offset = next;
        self.leave_finished_trak(movie);
        Ok(())
    }

    fn step_with(
        &mut self,
        window: &mut [u8],
        file_size: u64,
        movie: &mut MovieState,
    ) -> Result<(FourCC, u64)> {
        // Near the end of the file the window is allowed to come up short.
        let available = (window.len() as u64).min(file_size - self.atom_offset) as usize;
        let window = &mut window[..available];
        read_exact_at(&*self.reader, self.atom_offset, window)?;

        let header = parse_box_header(window, self.atom_offset, file_size)?;
        let body = &window[header.header_size as usize..];
        tracing::trace!(
            "box {} at {}: {} bytes",
            header.box_type,
            header.offset,
            header.size
        );

        let next = match header.box_type {
            MOOV | MDIA | MINF | STBL => Ok(header.body_offset()),
            TRAK => {
                self.trak.enter_trak();
                self.trak_end = Some(header.end());
                Ok(header.body_offset())
            }
            STSD => skip_into(&header, STSD_SKIP),
            AVC1 => skip_into(&header, AVC1_SKIP),
            AVCC => {
                self.parse_avcc(&header, movie)?;
                Ok(header.end())
            }
            ESDS => {
                self.parse_esds(&header, movie)?;
                Ok(header.end())
            }
            MP4A => parse_mp4a(&header, body),
            HDLR => {
                self.parse_hdlr(&header, body, movie)?;
                Ok(header.end())
            }
            MDHD => {
                self.parse_mdhd(&header, body, movie)?;
                Ok(header.end())
            }
            MVHD => {
                let timing = parse_time_header(&header, body)?;
                movie.duration_us = timing.duration_us();
                tracing::debug!("Movie duration {} us", movie.duration_us);
                Ok(header.end())
            }
            STCO | CO64 | STSZ | STTS | CTTS | STSC | STSS => {
                self.register_table(&header, body, file_size, movie)?;
                Ok(header.end())
            }
            TKHD | VMHD | SMHD | DINF | DREF => Ok(header.end()),
            other => {
                tracing::debug!("Skipping unsupported box {} ({} bytes)", other, header.size);
                Ok(header.end())
            }
        }?;
        Ok((header.box_type, next))
    }

    /// Seal the track whose `trak` the cursor just left.
    fn leave_finished_trak(&mut self, movie: &mut MovieState) {
        let Some(end) = self.trak_end else {
            return;
        };
        if self.atom_offset < end {
            return;
        }
        if let Some(kind) = self.trak.kind() {
            movie.index_mut(kind).seal();
            tracing::debug!("{:?} trak ends at {}", kind, end);
        }
        self.trak = TrakState::Outside;
        self.trak_end = None;
    }

    /// Download a whole box body through the pool.
    fn download_body(&self, header: &BoxHeader, skip: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(header.body_size() - skip).unwrap_or(usize::MAX);
        let mut buffer = self.pool.acquire(len)?;
        if let Err(e) = read_exact_at(&*self.reader, header.body_offset() + skip, &mut buffer) {
            self.pool.release(buffer);
            return Err(e);
        }
        Ok(buffer)
    }

    fn parse_avcc(&mut self, header: &BoxHeader, movie: &mut MovieState) -> Result<()> {
        if self.trak == TrakState::Ignored {
            return Ok(());
        }
        let record = self.download_body(header, 0)?;
        let parsed = AvcConfig::parse(&record);
        self.pool.release(record);

        let avc = parsed?;
        tracing::debug!(
            "avcC: profile {} level {}, {}-byte NAL lengths, {} SPS / {} PPS",
            avc.profile,
            avc.level,
            avc.nal_length_size,
            avc.sps.len(),
            avc.pps.len()
        );
        movie.codec.set_avc(avc);
        Ok(())
    }

    fn parse_esds(&mut self, header: &BoxHeader, movie: &mut MovieState) -> Result<()> {
        if header.body_size() < FULL_BOX_HEADER {
            return Err(DemuxError::invalid_box(
                ESDS,
                header.offset,
                format!("body is {} bytes, need {}", header.body_size(), FULL_BOX_HEADER),
            ));
        }
        if self.trak == TrakState::Ignored {
            return Ok(());
        }

        let payload = self.download_body(header, FULL_BOX_HEADER)?;
        let parsed = EsDescriptor::parse(&payload);
        self.pool.release(payload);

        let descriptor = parsed?;
        let info = &descriptor.decoder_specific_info;
        if info.len() < 2 {
            return Err(DemuxError::MissingDecoderConfig(
                "esds AudioSpecificConfig shorter than 2 bytes",
            ));
        }
        let aac = AacConfig::from_bytes(info[0], info[1])?;
        tracing::debug!(
            "esds: object type {}, {} Hz, {} channels",
            aac.object_type,
            aac.sampling_frequency,
            aac.channel_configuration
        );
        movie.codec.set_aac(aac);
        Ok(())
    }

    fn parse_hdlr(&mut self, header: &BoxHeader, body: &[u8], movie: &mut MovieState) -> Result<()> {
        require(header, body, 12)?;
        let mut subtype = [0u8; 4];
        subtype.copy_from_slice(&body[8..12]);
        let handler = HandlerType::from_subtype(subtype);

        let pending = self.trak.classify(handler);
        match self.trak.kind() {
            Some(kind) if movie.index(kind).is_sealed() => {
                tracing::debug!("Ignoring additional {:?} trak", kind);
                self.trak = TrakState::Ignored;
            }
            Some(kind) => {
                tracing::debug!("trak classified as {:?}", kind);
                if let Some((kind, timing)) = pending {
                    movie.commit_timing(kind, timing);
                }
            }
            None => tracing::debug!("Ignoring trak with handler {}", FourCC(subtype)),
        }
        Ok(())
    }

    fn parse_mdhd(&mut self, header: &BoxHeader, body: &[u8], movie: &mut MovieState) -> Result<()> {
        let timing = parse_time_header(header, body)?;

        // A track may run past the movie header's duration.
        let track_us = timing.duration_us();
        if track_us > movie.duration_us {
            tracing::warn!(
                "mdhd has longer duration: {} ms, movie header says {} ms",
                track_us / 1000,
                movie.duration_us / 1000
            );
            movie.duration_us = track_us;
        }

        if let Some((kind, timing)) = self.trak.observe_timing(timing) {
            movie.commit_timing(kind, timing);
        }
        Ok(())
    }

    fn register_table(
        &mut self,
        header: &BoxHeader,
        body: &[u8],
        file_size: u64,
        movie: &mut MovieState,
    ) -> Result<()> {
        let Some(kind) = self.trak.kind() else {
            tracing::trace!("Discarding {} outside an audio/video trak", header.box_type);
            return Ok(());
        };
        if header.end() > file_size {
            return Err(DemuxError::Truncated {
                fourcc: header.box_type,
                needed: header.size,
                available: file_size - header.offset,
            });
        }
        movie.index_mut(kind).set_atom(
            header.box_type,
            header.body_offset(),
            header.body_size(),
            self.cache_capacity,
            body,
        )
    }
}

/// Fail unless the box body is at least `needed` bytes and the header
/// window holds all of them.
fn require(header: &BoxHeader, body: &[u8], needed: usize) -> Result<()> {
    if header.body_size() < needed as u64 {
        return Err(DemuxError::invalid_box(
            header.box_type,
            header.offset,
            format!("body is {} bytes, need {}", header.body_size(), needed),
        ));
    }
    if body.len() < needed {
        return Err(DemuxError::Truncated {
            fourcc: header.box_type,
            needed: needed as u64,
            available: body.len() as u64,
        });
    }
    Ok(())
}

/// Step over a fixed prefix of a box whose children follow.
fn skip_into(header: &BoxHeader, prefix: u64) -> Result<u64> {
    if header.body_size() < prefix {
        return Err(DemuxError::invalid_box(
            header.box_type,
            header.offset,
            format!("body is {} bytes, need {}", header.body_size(), prefix),
        ));
    }
    Ok(header.body_offset() + prefix)
}

/// The first two body bytes select the sound description layout, which
/// fixes where the nested `esds` starts.
fn parse_mp4a(header: &BoxHeader, body: &[u8]) -> Result<u64> {
    require(header, body, 2)?;
    let version = (&body[..2]).get_u16();
    let prefix = MP4A_SIZES
        .get(version as usize)
        .copied()
        .ok_or(DemuxError::UnsupportedVersion {
            fourcc: MP4A,
            version,
        })?;
    skip_into(header, prefix)
}

/// Timescale and duration of an `mvhd` or `mdhd`.
///
/// ```text
/// version 0: flags(4) creation(4) modification(4) timescale(4) duration(4)
/// version 1: flags(4) creation(8) modification(8) timescale(4) duration(8)
/// ```
fn parse_time_header(header: &BoxHeader, body: &[u8]) -> Result<MediaTiming> {
    require(header, body, 1)?;
    let (needed, skip) = match body[0] {
        0 => (20, 12),
        1 => (32, 20),
        version => {
            return Err(DemuxError::UnsupportedVersion {
                fourcc: header.box_type,
                version: version as u16,
            })
        }
    };
    require(header, body, needed)?;

    let mut fields = &body[skip..];
    let timescale_hz = fields.get_u32();
    let duration_ticks = if body[0] == 1 {
        fields.get_u64()
    } else {
        fields.get_u32() as u64
    };
    if timescale_hz == 0 {
        return Err(DemuxError::ZeroTimescale(header.box_type));
    }
    Ok(MediaTiming {
        timescale_hz,
        duration_ticks,
    })
}
