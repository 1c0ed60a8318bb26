//! Synthetic MP4 files for tests.
//!
//! Builds `ftyp` + `moov` + `mdat` with real box layouts. Chunk offsets are
//! resolved in a second pass once the size of `moov` is known.

use crate::mp4::descriptor::DECODER_SPECIFIC_TAG;

pub const SPS: &[u8] = &[0x67, 0x42, 0x00, 0x1E, 0x95, 0xA8, 0x28];
pub const PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];

/// Box with a 32-bit size header.
pub fn boxed(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 8);
    out.extend_from_slice(&(body.len() as u32 + 8).to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

/// Box with `size == 1` and a 64-bit size after the type.
pub fn extended_boxed(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(body.len() as u64 + 16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

pub fn container(fourcc: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    boxed(fourcc, &children.concat())
}

/// Full box body for a table of `u32` tuples: version/flags, entry count,
/// then each entry's fields.
pub fn full_box_table(version: u8, entries: &[&[u32]]) -> Vec<u8> {
    let mut out = vec![version, 0, 0, 0];
    out.extend_from_slice(&(entries.len() as u32).to_be_bytes());
    for entry in entries {
        for field in *entry {
            out.extend_from_slice(&field.to_be_bytes());
        }
    }
    out
}

/// `stsz` body. A non-zero `constant` writes no per-sample table and only
/// takes the sample count from `sizes`.
pub fn stsz_body(constant: u32, sizes: &[u32]) -> Vec<u8> {
    let mut out = vec![0, 0, 0, 0];
    out.extend_from_slice(&constant.to_be_bytes());
    out.extend_from_slice(&(sizes.len() as u32).to_be_bytes());
    if constant == 0 {
        for size in sizes {
            out.extend_from_slice(&size.to_be_bytes());
        }
    }
    out
}

pub fn ftyp() -> Vec<u8> {
    boxed(b"ftyp", b"isom\x00\x00\x00\x00")
}

/// Version 0 `mvhd`/`mdhd` body.
fn time_header(timescale: u32, duration: u32, total_len: usize) -> Vec<u8> {
    let mut out = vec![0u8; 12];
    out.extend_from_slice(&timescale.to_be_bytes());
    out.extend_from_slice(&duration.to_be_bytes());
    out.resize(total_len, 0);
    out
}

pub fn mvhd(timescale: u32, duration: u32) -> Vec<u8> {
    boxed(b"mvhd", &time_header(timescale, duration, 100))
}

pub fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    boxed(b"mdhd", &time_header(timescale, duration, 24))
}

/// Version 1 `mdhd` with 64-bit times.
pub fn mdhd_v1(timescale: u32, duration: u64) -> Vec<u8> {
    let mut body = vec![1, 0, 0, 0];
    body.extend_from_slice(&[0u8; 16]);
    body.extend_from_slice(&timescale.to_be_bytes());
    body.extend_from_slice(&duration.to_be_bytes());
    body.extend_from_slice(&[0u8; 4]);
    boxed(b"mdhd", &body)
}

pub fn hdlr(subtype: &[u8; 4]) -> Vec<u8> {
    let mut body = vec![0u8; 8];
    body.extend_from_slice(subtype);
    body.extend_from_slice(&[0u8; 13]);
    boxed(b"hdlr", &body)
}

pub fn avcc_record() -> Vec<u8> {
    let mut record = vec![1, 0x42, 0x00, 0x1E, 0xFF, 0xE1];
    record.extend_from_slice(&(SPS.len() as u16).to_be_bytes());
    record.extend_from_slice(SPS);
    record.push(1);
    record.extend_from_slice(&(PPS.len() as u16).to_be_bytes());
    record.extend_from_slice(PPS);
    record
}

fn avc1_entry() -> Vec<u8> {
    let mut body = vec![0u8; 78];
    body.extend_from_slice(&boxed(b"avcC", &avcc_record()));
    boxed(b"avc1", &body)
}

/// `esds` body carrying an AAC-LC 44.1 kHz stereo AudioSpecificConfig.
pub fn esds_body(decoder_specific_info: &[u8]) -> Vec<u8> {
    let dsi_len = decoder_specific_info.len() as u8;
    let mut body = vec![0, 0, 0, 0];
    body.extend_from_slice(&[0x03, 3 + 2 + 13 + 2 + dsi_len, 0x00, 0x01, 0x00]);
    body.extend_from_slice(&[0x04, 13 + 2 + dsi_len]);
    body.extend_from_slice(&[0x40, 0x15, 0, 0, 0, 0, 0, 0xF4, 0, 0, 0, 0xF4, 0]);
    body.extend_from_slice(&[DECODER_SPECIFIC_TAG, dsi_len]);
    body.extend_from_slice(decoder_specific_info);
    body
}

fn mp4a_entry(version: u16) -> Vec<u8> {
    let fixed = match version {
        1 => 44,
        2 => 64,
        _ => 28,
    };
    let mut body = vec![0u8; fixed];
    body[..2].copy_from_slice(&version.to_be_bytes());
    body.extend_from_slice(&boxed(b"esds", &esds_body(&[0x12, 0x10])));
    boxed(b"mp4a", &body)
}

/// One track of the synthetic file.
#[derive(Debug, Clone)]
pub struct TrackSpec {
    pub handler: [u8; 4],
    pub timescale: u32,
    pub sample_sizes: Vec<u32>,
    /// `(count, delta)` runs.
    pub stts: Vec<(u32, u32)>,
    /// `(count, offset)` runs; empty writes no `ctts`.
    pub ctts: Vec<(u32, i32)>,
    /// 1-based sync sample numbers; `None` writes no `stss`.
    pub sync_samples: Option<Vec<u32>>,
    pub samples_per_chunk: u32,
    pub mdhd_before_hdlr: bool,
    pub mdhd_version: u8,
    pub mp4a_version: u16,
    /// Write chunk offsets as `co64` instead of `stco`.
    pub co64: bool,
}

impl TrackSpec {
    /// AAC at 44.1 kHz, 1024 ticks per frame.
    pub fn audio(samples: u32) -> Self {
        Self {
            handler: *b"soun",
            timescale: 44_100,
            sample_sizes: (0..samples).map(|i| 180 + i % 11).collect(),
            stts: vec![(samples, 1024)],
            ctts: Vec::new(),
            sync_samples: None,
            samples_per_chunk: 4,
            mdhd_before_hdlr: true,
            mdhd_version: 0,
            mp4a_version: 0,
            co64: false,
        }
    }

    /// H.264 at 29.97 fps (timescale 30000), a keyframe every 5 frames.
    pub fn video(samples: u32) -> Self {
        Self {
            handler: *b"vide",
            timescale: 30_000,
            sample_sizes: (0..samples).map(|i| if i % 5 == 0 { 900 } else { 300 + i }).collect(),
            stts: vec![(samples, 1001)],
            ctts: Vec::new(),
            sync_samples: Some((0..samples).step_by(5).map(|i| i + 1).collect()),
            samples_per_chunk: 5,
            mdhd_before_hdlr: true,
            mdhd_version: 0,
            mp4a_version: 0,
            co64: false,
        }
    }

    pub fn duration_ticks(&self) -> u64 {
        self.stts.iter().map(|&(count, delta)| count as u64 * delta as u64).sum()
    }

    fn chunk_count(&self) -> u32 {
        (self.sample_sizes.len() as u32).div_ceil(self.samples_per_chunk)
    }

    fn is_video(&self) -> bool {
        &self.handler == b"vide"
    }

    /// Sample bytes. Video samples are a single length-prefixed NAL unit.
    fn sample_data(&self, index: usize) -> Vec<u8> {
        let size = self.sample_sizes[index] as usize;
        let mut data = vec![(index % 251) as u8; size];
        if self.is_video() && size > 4 {
            data[..4].copy_from_slice(&(size as u32 - 4).to_be_bytes());
            let is_sync = self
                .sync_samples
                .as_ref()
                .map_or(true, |sync| sync.contains(&(index as u32 + 1)));
            data[4] = if is_sync { 0x65 } else { 0x41 };
        }
        data
    }

    fn trak(&self, chunk_offsets: &[u32]) -> Vec<u8> {
        let timing = if self.mdhd_version == 1 {
            mdhd_v1(self.timescale, self.duration_ticks())
        } else {
            mdhd(self.timescale, self.duration_ticks() as u32)
        };
        let handler = hdlr(&self.handler);
        let (first, second) = if self.mdhd_before_hdlr {
            (timing, handler)
        } else {
            (handler, timing)
        };

        let (media_header, entry) = if self.is_video() {
            (boxed(b"vmhd", &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]), avc1_entry())
        } else {
            (boxed(b"smhd", &[0u8; 8]), mp4a_entry(self.mp4a_version))
        };
        let mut stsd = vec![0, 0, 0, 0, 0, 0, 0, 1];
        stsd.extend_from_slice(&entry);

        let stts: Vec<[u32; 2]> = self.stts.iter().map(|&(c, d)| [c, d]).collect();
        let stts_refs: Vec<&[u32]> = stts.iter().map(|e| &e[..]).collect();
        let chunks: Vec<[u32; 2]> = chunk_offsets.iter().map(|&o| [0, o]).collect();
        let chunk_refs: Vec<&[u32]> = if self.co64 {
            chunks.iter().map(|e| &e[..]).collect()
        } else {
            chunks.iter().map(|e| &e[1..]).collect()
        };
        let stsc_entry = [1, self.samples_per_chunk, 1];

        let mut stbl = vec![
            boxed(b"stsd", &stsd),
            boxed(b"stts", &full_box_table(0, &stts_refs)),
        ];
        if !self.ctts.is_empty() {
            let ctts: Vec<[u32; 2]> = self.ctts.iter().map(|&(c, o)| [c, o as u32]).collect();
            let refs: Vec<&[u32]> = ctts.iter().map(|e| &e[..]).collect();
            stbl.push(boxed(b"ctts", &full_box_table(1, &refs)));
        }
        stbl.push(boxed(b"stsc", &full_box_table(0, &[&stsc_entry])));
        stbl.push(boxed(b"stsz", &stsz_body(0, &self.sample_sizes)));
        let chunk_box = if self.co64 { b"co64" } else { b"stco" };
        stbl.push(boxed(chunk_box, &full_box_table(0, &chunk_refs)));
        if let Some(sync) = &self.sync_samples {
            let entries: Vec<[u32; 1]> = sync.iter().map(|&s| [s]).collect();
            let refs: Vec<&[u32]> = entries.iter().map(|e| &e[..]).collect();
            stbl.push(boxed(b"stss", &full_box_table(0, &refs)));
        }

        let dinf = container(b"dinf", &[boxed(b"dref", &[0, 0, 0, 0, 0, 0, 0, 0])]);
        let minf = container(b"minf", &[media_header, dinf, container(b"stbl", &stbl)]);
        container(
            b"trak",
            &[
                boxed(b"tkhd", &[0u8; 84]),
                container(b"mdia", &[first, second, minf]),
            ],
        )
    }
}

/// Whole-file builder.
#[derive(Debug, Clone)]
pub struct Mp4Builder {
    pub movie_timescale: u32,
    pub movie_duration: u32,
    pub tracks: Vec<TrackSpec>,
    /// Extra boxes written into `moov` ahead of the tracks.
    pub moov_prefix: Vec<Vec<u8>>,
}

impl Mp4Builder {
    /// 40 audio frames and 30 video frames, both about a second long.
    pub fn new() -> Self {
        Self {
            movie_timescale: 1000,
            movie_duration: 1000,
            tracks: vec![TrackSpec::video(30), TrackSpec::audio(40)],
            moov_prefix: Vec::new(),
        }
    }

    pub fn with_tracks(tracks: Vec<TrackSpec>) -> Self {
        Self {
            tracks,
            ..Self::new()
        }
    }

    fn moov(&self, chunk_offsets: &[Vec<u32>]) -> Vec<u8> {
        let mut children = vec![mvhd(self.movie_timescale, self.movie_duration)];
        children.extend(self.moov_prefix.iter().cloned());
        for (track, offsets) in self.tracks.iter().zip(chunk_offsets) {
            children.push(track.trak(offsets));
        }
        container(b"moov", &children)
    }

    /// Sample payload of each track, chunk by chunk, and each chunk's offset
    /// relative to the start of the `mdat` body.
    fn layout(&self) -> (Vec<u8>, Vec<Vec<u32>>) {
        let mut mdat = Vec::new();
        let mut offsets = Vec::new();
        for track in &self.tracks {
            let mut track_offsets = Vec::new();
            for chunk in 0..track.chunk_count() as usize {
                track_offsets.push(mdat.len() as u32);
                let first = chunk * track.samples_per_chunk as usize;
                let last = (first + track.samples_per_chunk as usize).min(track.sample_sizes.len());
                for sample in first..last {
                    mdat.extend_from_slice(&track.sample_data(sample));
                }
            }
            offsets.push(track_offsets);
        }
        (mdat, offsets)
    }

    pub fn build(&self) -> Vec<u8> {
        let (mdat, relative) = self.layout();
        let moov_len = self.moov(&relative).len();
        let mdat_body_start = (ftyp().len() + moov_len + 8) as u32;

        let absolute: Vec<Vec<u32>> = relative
            .iter()
            .map(|offsets| offsets.iter().map(|o| o + mdat_body_start).collect())
            .collect();

        let mut file = ftyp();
        file.extend_from_slice(&self.moov(&absolute));
        file.extend_from_slice(&boxed(b"mdat", &mdat));
        file
    }

    /// Bytes of sample `index` of track `track` as stored in the file.
    pub fn sample_bytes(&self, track: usize, index: usize) -> Vec<u8> {
        self.tracks[track].sample_data(index)
    }
}

impl Default for Mp4Builder {
    fn default() -> Self {
        Self::new()
    }
}
