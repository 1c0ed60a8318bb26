//! MP4 sample table index.
//!
//! One index per track. It owns the `stbl` sub-tables (as paged
//! [`TableCache`]s) and answers per-sample queries:
//!
//! - stco/co64: chunk offsets
//! - stsc: sample-to-chunk runs
//! - stsz: sample sizes (constant or per-sample)
//! - stts: decode time deltas, run-length encoded
//! - ctts: composition offsets (B-frame reordering)
//! - stss: sync samples (keyframes); absent means every sample is one
//!
//! Playback walks samples in order, so every lookup keeps a cursor at the
//! run it last resolved and only rescans from the start when asked for an
//! earlier sample.

use std::sync::Arc;

use bytes::Buf;

use crate::error::{DemuxError, Result};
use crate::mp4::atom::{FourCC, CO64, CTTS, STCO, STSC, STSS, STSZ, STTS};
use crate::mp4::table_cache::TableCache;
use crate::mp4::track::TrackKind;
use crate::reader::ByteRangeReader;

/// Resolved location and timing of one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInfo {
    pub offset: u64,
    pub size: u32,
    pub duration_ticks: u32,
    pub timestamp_ticks: u64,
    pub is_keyframe: bool,
}

#[derive(Debug)]
enum SampleSizes {
    Constant { size: u32, count: u32 },
    Table(TableCache),
}

impl SampleSizes {
    fn count(&self) -> u32 {
        match self {
            SampleSizes::Constant { count, .. } => *count,
            SampleSizes::Table(table) => table.len(),
        }
    }
}

/// Start of the run-length entry that resolved the last lookup.
#[derive(Debug, Clone, Copy, Default)]
struct RunCursor {
    entry: u32,
    first_sample: u64,
    first_ticks: u64,
}

/// Running byte offset inside the chunk that resolved the last lookup.
#[derive(Debug, Clone, Copy)]
struct OffsetMemo {
    chunk_first_sample: u64,
    sample: u64,
    offset: u64,
}

pub struct SampleTableIndex {
    kind: TrackKind,
    reader: Arc<dyn ByteRangeReader>,
    chunk_offsets: Option<TableCache>,
    sample_sizes: Option<SampleSizes>,
    sample_to_chunk: Option<TableCache>,
    time_to_sample: Option<TableCache>,
    composition_offsets: Option<TableCache>,
    sync_samples: Option<TableCache>,
    sealed: bool,
    stts_cursor: RunCursor,
    ctts_cursor: RunCursor,
    stsc_cursor: RunCursor,
    offset_memo: Option<OffsetMemo>,
}

impl SampleTableIndex {
    pub fn new(kind: TrackKind, reader: Arc<dyn ByteRangeReader>) -> Self {
        Self {
            kind,
            reader,
            chunk_offsets: None,
            sample_sizes: None,
            sample_to_chunk: None,
            time_to_sample: None,
            composition_offsets: None,
            sync_samples: None,
            sealed: false,
            stts_cursor: RunCursor::default(),
            ctts_cursor: RunCursor::default(),
            stsc_cursor: RunCursor::default(),
            offset_memo: None,
        }
    }

    /// Register one sub-table. `offset`/`size` describe the box body and
    /// `header` holds its leading bytes as already downloaded.
    pub fn set_atom(
        &mut self,
        fourcc: FourCC,
        offset: u64,
        size: u64,
        cache_capacity: u32,
        header: &[u8],
    ) -> Result<()> {
        // version/flags + entry count, or for stsz + constant size
        let header_len: u64 = if fourcc == STSZ { 12 } else { 8 };
        if size < header_len || (header.len() as u64) < header_len {
            return Err(DemuxError::Truncated {
                fourcc,
                needed: header_len,
                available: size.min(header.len() as u64),
            });
        }

        let mut fields = header;
        let version = fields.get_u8();
        fields.advance(3);
        let entries_offset = offset + header_len;
        let available = size - header_len;

        match fourcc {
            STCO | CO64 => {
                let count = fields.get_u32();
                let entry_size = if fourcc == CO64 { 8 } else { 4 };
                self.chunk_offsets = Some(TableCache::new(
                    fourcc,
                    entries_offset,
                    count,
                    entry_size,
                    cache_capacity,
                    available,
                )?);
                self.offset_memo = None;
            }
            STSZ => {
                let constant = fields.get_u32();
                let count = fields.get_u32();
                self.sample_sizes = Some(if constant != 0 {
                    SampleSizes::Constant {
                        size: constant,
                        count,
                    }
                } else {
                    SampleSizes::Table(TableCache::new(
                        fourcc,
                        entries_offset,
                        count,
                        4,
                        cache_capacity,
                        available,
                    )?)
                });
                self.offset_memo = None;
            }
            STSC => {
                let count = fields.get_u32();
                self.sample_to_chunk = Some(TableCache::new(
                    fourcc,
                    entries_offset,
                    count,
                    12,
                    cache_capacity,
                    available,
                )?);
                self.stsc_cursor = RunCursor::default();
                self.offset_memo = None;
            }
            STTS => {
                let count = fields.get_u32();
                self.time_to_sample = Some(TableCache::new(
                    fourcc,
                    entries_offset,
                    count,
                    8,
                    cache_capacity,
                    available,
                )?);
                self.stts_cursor = RunCursor::default();
            }
            CTTS => {
                if version > 1 {
                    return Err(DemuxError::UnsupportedVersion {
                        fourcc,
                        version: version as u16,
                    });
                }
                let count = fields.get_u32();
                self.composition_offsets = Some(TableCache::new(
                    fourcc,
                    entries_offset,
                    count,
                    8,
                    cache_capacity,
                    available,
                )?);
                self.ctts_cursor = RunCursor::default();
            }
            STSS => {
                let count = fields.get_u32();
                self.sync_samples = Some(TableCache::new(
                    fourcc,
                    entries_offset,
                    count,
                    4,
                    cache_capacity,
                    available,
                )?);
            }
            other => {
                return Err(DemuxError::invalid_box(other, offset, "not a sample table box"));
            }
        }

        tracing::debug!("{:?} sample table: registered {} ({} bytes)", self.kind, fourcc, size);
        Ok(())
    }

    /// No further sub-tables will arrive for this track.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// True once offsets, sizes, chunk runs and durations are registered,
    /// plus sync samples for video unless the track's `trak` has ended.
    pub fn is_complete(&self) -> bool {
        let required = self.chunk_offsets.is_some()
            && self.sample_sizes.is_some()
            && self.sample_to_chunk.is_some()
            && self.time_to_sample.is_some();
        let keyframes = match self.kind {
            TrackKind::Audio => true,
            TrackKind::Video => self.sync_samples.is_some() || self.sealed,
        };
        required && keyframes
    }

    pub fn sample_count(&self) -> u32 {
        self.sample_sizes.as_ref().map_or(0, SampleSizes::count)
    }

    pub fn is_eos(&self, sample: u32) -> bool {
        sample >= self.sample_count()
    }

    fn check_index(&self, sample: u32) -> Result<()> {
        let count = self.sample_count();
        if sample >= count {
            return Err(DemuxError::SampleOutOfRange { index: sample, count });
        }
        Ok(())
    }

    pub fn size(&mut self, sample: u32) -> Result<u32> {
        self.check_index(sample)?;
        match self.sample_sizes.as_mut() {
            Some(SampleSizes::Constant { size, .. }) => Ok(*size),
            Some(SampleSizes::Table(table)) => table.u32_at(&*self.reader, sample, 0),
            None => Err(DemuxError::NotConfigured("stsz not registered")),
        }
    }

    pub fn offset(&mut self, sample: u32) -> Result<u64> {
        self.check_index(sample)?;
        let sample = sample as u64;
        let (chunk, chunk_first_sample) = self.locate_chunk(sample)?;

        let reader = &*self.reader;
        let chunk_offsets = self
            .chunk_offsets
            .as_mut()
            .ok_or(DemuxError::NotConfigured("stco/co64 not registered"))?;
        let chunk_base = if chunk_offsets.fourcc() == CO64 {
            chunk_offsets.u64_at(reader, chunk)?
        } else {
            chunk_offsets.u32_at(reader, chunk, 0)? as u64
        };

        match self.sample_sizes.as_mut() {
            Some(SampleSizes::Constant { size, .. }) => (sample - chunk_first_sample)
                .checked_mul(*size as u64)
                .and_then(|skip| chunk_base.checked_add(skip))
                .ok_or_else(|| offset_overflow(self.kind, sample, chunk_base)),
            Some(SampleSizes::Table(sizes)) => {
                let (mut at, mut offset) = match self.offset_memo {
                    Some(memo)
                        if memo.chunk_first_sample == chunk_first_sample && memo.sample <= sample =>
                    {
                        (memo.sample, memo.offset)
                    }
                    _ => (chunk_first_sample, chunk_base),
                };
                while at < sample {
                    let size = sizes.u32_at(reader, at as u32, 0)? as u64;
                    offset = offset
                        .checked_add(size)
                        .ok_or_else(|| offset_overflow(self.kind, sample, chunk_base))?;
                    at += 1;
                }
                self.offset_memo = Some(OffsetMemo {
                    chunk_first_sample,
                    sample,
                    offset,
                });
                Ok(offset)
            }
            None => Err(DemuxError::NotConfigured("stsz not registered")),
        }
    }

    /// Chunk index holding `sample`, and the first sample of that chunk.
    fn locate_chunk(&mut self, sample: u64) -> Result<(u32, u64)> {
        let reader = &*self.reader;
        let chunk_count = self
            .chunk_offsets
            .as_ref()
            .ok_or(DemuxError::NotConfigured("stco/co64 not registered"))?
            .len();
        let stsc = self
            .sample_to_chunk
            .as_mut()
            .ok_or(DemuxError::NotConfigured("stsc not registered"))?;

        if sample < self.stsc_cursor.first_sample {
            self.stsc_cursor = RunCursor::default();
        }

        loop {
            let entry = self.stsc_cursor.entry;
            if entry >= stsc.len() {
                return Err(DemuxError::SampleTable(format!(
                    "stsc runs cover only {} samples, sample {} requested",
                    self.stsc_cursor.first_sample, sample
                )));
            }
            // first_chunk is 1-based
            let first_chunk = stsc.u32_at(reader, entry, 0)?.saturating_sub(1);
            let samples_per_chunk = stsc.u32_at(reader, entry, 1)? as u64;
            let next_first_chunk = if entry + 1 < stsc.len() {
                stsc.u32_at(reader, entry + 1, 0)?.saturating_sub(1)
            } else {
                chunk_count
            };
            if next_first_chunk < first_chunk || next_first_chunk > chunk_count {
                return Err(DemuxError::SampleTable(format!(
                    "stsc entry {} spans chunks {}..{} of {}",
                    entry, first_chunk, next_first_chunk, chunk_count
                )));
            }

            let run_samples = (next_first_chunk - first_chunk) as u64 * samples_per_chunk;
            let run_first_sample = self.stsc_cursor.first_sample;
            if sample < run_first_sample + run_samples {
                let chunk_in_run = (sample - run_first_sample) / samples_per_chunk;
                let chunk = first_chunk + chunk_in_run as u32;
                return Ok((chunk, run_first_sample + chunk_in_run * samples_per_chunk));
            }

            self.stsc_cursor.first_sample += run_samples;
            self.stsc_cursor.entry += 1;
        }
    }

    /// Decode timestamp and duration of `sample`, both in ticks.
    fn decode_time(&mut self, sample: u64) -> Result<(u64, u32)> {
        let reader = &*self.reader;
        let stts = self
            .time_to_sample
            .as_mut()
            .ok_or(DemuxError::NotConfigured("stts not registered"))?;

        if sample < self.stts_cursor.first_sample {
            self.stts_cursor = RunCursor::default();
        }

        loop {
            let cursor = &mut self.stts_cursor;
            if cursor.entry >= stts.len() {
                return Err(DemuxError::SampleTable(format!(
                    "stts covers only {} samples, sample {} requested",
                    cursor.first_sample, sample
                )));
            }
            let count = stts.u32_at(reader, cursor.entry, 0)? as u64;
            let delta = stts.u32_at(reader, cursor.entry, 1)?;
            if sample < cursor.first_sample + count {
                let ticks = cursor.first_ticks + (sample - cursor.first_sample) * delta as u64;
                return Ok((ticks, delta));
            }
            cursor.first_sample += count;
            cursor.first_ticks += count * delta as u64;
            cursor.entry += 1;
        }
    }

    /// Composition offset of `sample`; samples past the end of `ctts` get 0.
    fn composition_offset(&mut self, sample: u64) -> Result<i64> {
        let reader = &*self.reader;
        let Some(ctts) = self.composition_offsets.as_mut() else {
            return Ok(0);
        };

        if sample < self.ctts_cursor.first_sample {
            self.ctts_cursor = RunCursor::default();
        }

        loop {
            let cursor = &mut self.ctts_cursor;
            if cursor.entry >= ctts.len() {
                return Ok(0);
            }
            let count = ctts.u32_at(reader, cursor.entry, 0)? as u64;
            if sample < cursor.first_sample + count {
                // version 0 is nominally unsigned, but writers put signed
                // values there too
                return Ok(ctts.u32_at(reader, cursor.entry, 1)? as i32 as i64);
            }
            cursor.first_sample += count;
            cursor.entry += 1;
        }
    }

    pub fn duration(&mut self, sample: u32) -> Result<u32> {
        self.check_index(sample)?;
        Ok(self.decode_time(sample as u64)?.1)
    }

    /// Presentation timestamp in ticks: decode time shifted by the
    /// composition offset (video only).
    pub fn timestamp(&mut self, sample: u32) -> Result<u64> {
        self.check_index(sample)?;
        let (dts, _) = self.decode_time(sample as u64)?;
        if self.kind == TrackKind::Audio {
            return Ok(dts);
        }
        let shift = self.composition_offset(sample as u64)?;
        Ok(dts.saturating_add_signed(shift))
    }

    pub fn is_keyframe(&mut self, sample: u32) -> Result<bool> {
        self.check_index(sample)?;
        if self.sync_samples.is_none() {
            return Ok(true);
        }
        Ok(self.sync_at_or_before(sample + 1)? == Some(sample + 1))
    }

    /// Greatest 1-based sync sample number `<= sample_number`.
    fn sync_at_or_before(&mut self, sample_number: u32) -> Result<Option<u32>> {
        let reader = &*self.reader;
        let Some(stss) = self.sync_samples.as_mut() else {
            return Ok(Some(sample_number));
        };
        let (mut lo, mut hi) = (0u32, stss.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if stss.u32_at(reader, mid, 0)? <= sample_number {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == 0 {
            return Ok(None);
        }
        stss.u32_at(reader, lo - 1, 0).map(Some)
    }

    /// Keyframe whose presentation time is at or immediately before
    /// `target_ticks`. Targets past the end resolve against the last sample;
    /// a target before the first sync sample resolves to that sync sample.
    pub fn keyframe(&mut self, target_ticks: u64) -> Result<u32> {
        let count = self.sample_count();
        if count == 0 {
            return Err(DemuxError::SampleTable(format!("{:?} track has no samples", self.kind)));
        }
        let sample = self.sample_at_ticks(target_ticks)?.min(count as u64 - 1) as u32;

        match self.sync_at_or_before(sample + 1)? {
            Some(mut number) => {
                // A composition offset can present a sync sample after the
                // target even though it decodes before it.
                while number > 1 && self.timestamp(number - 1)? > target_ticks {
                    match self.sync_at_or_before(number - 1)? {
                        Some(earlier) if earlier >= 1 => number = earlier,
                        _ => break,
                    }
                }
                Ok(number.saturating_sub(1))
            }
            None => {
                let reader = &*self.reader;
                let first = match self.sync_samples.as_mut() {
                    Some(stss) if !stss.is_empty() => stss.u32_at(reader, 0, 0)?,
                    _ => 1,
                };
                Ok(first.saturating_sub(1).min(count - 1))
            }
        }
    }

    /// Last sample whose decode time is `<= target_ticks`.
    fn sample_at_ticks(&mut self, target_ticks: u64) -> Result<u64> {
        let reader = &*self.reader;
        let stts = self
            .time_to_sample
            .as_mut()
            .ok_or(DemuxError::NotConfigured("stts not registered"))?;

        let mut first_sample = 0u64;
        let mut first_ticks = 0u64;
        for entry in 0..stts.len() {
            let count = stts.u32_at(reader, entry, 0)? as u64;
            let delta = stts.u32_at(reader, entry, 1)? as u64;
            if count == 0 {
                continue;
            }
            let run_ticks = count * delta;
            if target_ticks < first_ticks + run_ticks {
                return Ok(first_sample + (target_ticks - first_ticks) / delta);
            }
            first_sample += count;
            first_ticks += run_ticks;
        }
        Ok(first_sample.saturating_sub(1))
    }

    /// All fields of `sample`, checked against the size of the source.
    pub fn sample(&mut self, sample: u32) -> Result<SampleInfo> {
        let size = self.size(sample)?;
        let offset = self.offset(sample)?;
        let duration_ticks = self.duration(sample)?;
        let timestamp_ticks = self.timestamp(sample)?;
        let is_keyframe = self.is_keyframe(sample)?;

        let file_size = self.reader.file_size();
        if offset.checked_add(size as u64).map_or(true, |end| end > file_size) {
            return Err(DemuxError::SampleTable(format!(
                "{:?} sample {} at {}+{} runs past end of file ({})",
                self.kind, sample, offset, size, file_size
            )));
        }

        Ok(SampleInfo {
            offset,
            size,
            duration_ticks,
            timestamp_ticks,
            is_keyframe,
        })
    }
}

fn offset_overflow(kind: TrackKind, sample: u64, chunk_base: u64) -> DemuxError {
    DemuxError::SampleTable(format!(
        "{:?} sample {} offset overflows from chunk base {}",
        kind, sample, chunk_base
    ))
}
