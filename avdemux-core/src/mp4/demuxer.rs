//! Flat MP4 (H.264 + AAC) demuxer.
//!
//! Configuration parsing walks `moov` until both tracks have a codec
//! config, a timescale and a complete sample index. After that, access
//! units and seeks are answered from the two indices alone.

use std::sync::Arc;

use serde::Serialize;

use crate::access_unit::{AccessUnit, AccessUnitSink};
use crate::aac::AacConfig;
use crate::buffer::BufferPool;
use crate::config::DemuxerConfig;
use crate::demuxer::{ContainerKind, Demuxer};
use crate::error::{DemuxError, Result};
use crate::h264_utils::AvcConfig;
use crate::mp4::atom::{BOX_HEADER_SIZE, FTYP};
use crate::mp4::parser::{AtomWalker, MovieState};
use crate::mp4::track::{ticks_to_us, us_to_ticks, MediaTiming, TrackKind};
use crate::reader::ByteRangeReader;

/// Per-track summary, available once configuration has been parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub timescale_hz: u32,
    pub duration_us: i64,
    pub sample_count: u32,
}

pub struct Mp4Demuxer {
    reader: Arc<dyn ByteRangeReader>,
    pool: Arc<BufferPool>,
    walker: AtomWalker,
    movie: MovieState,
    configured: bool,
    audio_sample: u32,
    video_sample: u32,
    // Where the next audio frame should start if the stream is contiguous.
    first_audio_hole_ticks: u64,
    first_audio_hole_us: i64,
}

impl Mp4Demuxer {
    /// Recognize an MP4 from the first bytes of the source.
    ///
    /// Returns `Ok(None)` if the stream does not start with `ftyp`, so that
    /// another demuxer can be tried.
    pub fn construct(
        reader: Arc<dyn ByteRangeReader>,
        sniff_header: &[u8],
        pool: Arc<BufferPool>,
        config: &DemuxerConfig,
    ) -> Result<Option<Self>> {
        config.validate()?;
        if sniff_header.len() < BOX_HEADER_SIZE as usize || sniff_header[4..8] != FTYP.0 {
            return Ok(None);
        }

        let ftyp_size = u32::from_be_bytes([
            sniff_header[0],
            sniff_header[1],
            sniff_header[2],
            sniff_header[3],
        ]) as u64;
        if ftyp_size < BOX_HEADER_SIZE {
            return Err(DemuxError::invalid_box(
                FTYP,
                0,
                format!("size {} is less than header size {}", ftyp_size, BOX_HEADER_SIZE),
            ));
        }

        tracing::debug!("MP4 stream detected, ftyp is {} bytes", ftyp_size);
        Ok(Some(Self {
            walker: AtomWalker::new(reader.clone(), pool.clone(), ftyp_size, config),
            movie: MovieState::new(reader.clone()),
            reader,
            pool,
            configured: false,
            audio_sample: 0,
            video_sample: 0,
            first_audio_hole_ticks: 0,
            first_audio_hole_us: 0,
        }))
    }

    /// Walk boxes until both tracks are fully described. Any parse failure
    /// is terminal.
    pub fn parse_config(&mut self) -> Result<()> {
        while !self.movie.is_complete() {
            if let Err(e) = self.walker.step(&mut self.movie) {
                tracing::warn!(
                    "MP4 configuration failed near offset {}: {}",
                    self.walker.offset(),
                    e
                );
                return Err(e);
            }
        }

        if !self.configured {
            self.configured = true;
            tracing::info!(
                "MP4 configured: {} audio / {} video samples, duration {} ms",
                self.movie.audio.sample_count(),
                self.movie.video.sample_count(),
                self.movie.duration_us / 1000
            );
        }
        Ok(())
    }

    fn timing(&self, kind: TrackKind) -> Result<MediaTiming> {
        if !self.configured {
            return Err(DemuxError::NotConfigured("parse_config has not completed"));
        }
        self.movie
            .timing(kind)
            .ok_or(DemuxError::NotConfigured("track has no media header"))
    }

    /// Next access unit of `kind`, or an end-of-stream unit once the track
    /// is exhausted.
    pub fn next_access_unit(&mut self, kind: TrackKind) -> Result<AccessUnit> {
        let timing = self.timing(kind)?;
        let sample = self.next_sample(kind);
        let index = self.movie.index_mut(kind);
        if index.is_eos(sample) {
            return Ok(AccessUnit::end_of_stream(kind, timing.duration_us()));
        }

        let info = index.sample(sample).map_err(|e| {
            tracing::error!("Parsed bad {:?} access unit {}: {}", kind, sample, e);
            e
        })?;

        let hz = timing.timescale_hz;
        let mut timestamp_us = ticks_to_us(info.timestamp_ticks, hz);
        let mut duration_us = ticks_to_us(info.duration_ticks as u64, hz);

        let is_keyframe = match kind {
            TrackKind::Audio => {
                self.audio_sample += 1;
                if self.first_audio_hole_ticks == info.timestamp_ticks {
                    // Snap to where the previous frame ended and fold the
                    // rounding difference into this frame's duration.
                    let difference = timestamp_us - self.first_audio_hole_us;
                    timestamp_us = self.first_audio_hole_us;
                    duration_us += difference;
                    self.first_audio_hole_us = timestamp_us + duration_us;
                    self.first_audio_hole_ticks += info.duration_ticks as u64;
                } else {
                    tracing::warn!(
                        "Non-contiguous audio timestamp: sample {} at {} ticks, expected {}",
                        sample,
                        info.timestamp_ticks,
                        self.first_audio_hole_ticks
                    );
                    self.first_audio_hole_ticks = info.timestamp_ticks + info.duration_ticks as u64;
                    self.first_audio_hole_us = timestamp_us + duration_us;
                }
                // every AAC frame is a random access point
                true
            }
            TrackKind::Video => {
                self.video_sample += 1;
                // B-frames leave small gaps; presentation follows the audio
                // clock, so pad each frame by one tick.
                duration_us += timing.one_tick_us();
                info.is_keyframe
            }
        };

        let codec = &self.movie.codec;
        Ok(AccessUnit {
            kind,
            offset: info.offset,
            size: info.size,
            prepend_size: codec.prepend_size(kind, is_keyframe),
            nal_header_size: (kind == TrackKind::Video).then(|| codec.nal_header_size()),
            is_keyframe,
            timestamp_us,
            duration_us,
            end_of_stream: false,
        })
    }

    /// Position both tracks at the keyframes preceding `time_us`. On error
    /// neither track moves.
    pub fn seek_to(&mut self, time_us: i64) -> Result<()> {
        let video = self.timing(TrackKind::Video)?;
        let audio = self.timing(TrackKind::Audio)?;

        let video_ticks = us_to_ticks(time_us, video.timescale_hz);
        let video_sample = self.movie.video.keyframe(video_ticks)?;
        let keyframe_ticks = self.movie.video.timestamp(video_sample)?;
        let keyframe_us = ticks_to_us(keyframe_ticks, video.timescale_hz);

        let audio_ticks = us_to_ticks(keyframe_us, audio.timescale_hz);
        let audio_sample = self.movie.audio.keyframe(audio_ticks)?;
        let audio_sample_ticks = self.movie.audio.timestamp(audio_sample)?;

        tracing::debug!(
            "Seeking to {} ms: video sample {}, audio sample {}",
            time_us / 1000,
            video_sample,
            audio_sample
        );
        self.video_sample = video_sample;
        self.audio_sample = audio_sample;
        // Resume continuity tracking from the new audio position.
        self.first_audio_hole_ticks = audio_sample_ticks;
        self.first_audio_hole_us = ticks_to_us(audio_sample_ticks, audio.timescale_hz);
        Ok(())
    }

    /// Pull one access unit, materialize it and hand it to `sink`. Returns
    /// false once the track has reached end of stream.
    pub fn pump(&mut self, kind: TrackKind, sink: &mut dyn AccessUnitSink) -> Result<bool> {
        let unit = self.next_access_unit(kind)?;
        if unit.end_of_stream {
            sink.end_of_stream(kind, unit.duration_us);
            return Ok(false);
        }

        let payload = unit.read_payload(&*self.reader, &self.movie.codec, &self.pool)?;
        sink.deliver(&unit, &payload);
        self.pool.release(payload);
        Ok(true)
    }

    /// Index of the sample the next access unit of `kind` will carry.
    pub fn next_sample(&self, kind: TrackKind) -> u32 {
        match kind {
            TrackKind::Audio => self.audio_sample,
            TrackKind::Video => self.video_sample,
        }
    }

    pub fn duration_us(&self) -> i64 {
        self.movie.duration_us
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn track_info(&self, kind: TrackKind) -> Option<TrackInfo> {
        let timing = self.movie.timing(kind)?;
        Some(TrackInfo {
            kind,
            timescale_hz: timing.timescale_hz,
            duration_us: timing.duration_us(),
            sample_count: self.movie.index(kind).sample_count(),
        })
    }

    pub fn avc_config(&self) -> Option<&AvcConfig> {
        self.movie.codec.avc()
    }

    pub fn aac_config(&self) -> Option<&AacConfig> {
        self.movie.codec.aac()
    }
}

impl Demuxer for Mp4Demuxer {
    fn container(&self) -> ContainerKind {
        ContainerKind::Mp4
    }

    fn parse_config(&mut self) -> Result<()> {
        Mp4Demuxer::parse_config(self)
    }

    fn next_access_unit(&mut self, kind: TrackKind) -> Result<AccessUnit> {
        Mp4Demuxer::next_access_unit(self, kind)
    }

    fn seek_to(&mut self, time_us: i64) -> Result<()> {
        Mp4Demuxer::seek_to(self, time_us)
    }

    fn duration_us(&self) -> i64 {
        Mp4Demuxer::duration_us(self)
    }
}
