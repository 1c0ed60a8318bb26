// avdemux probe - headless MP4 inspection
//
// Opens a file, parses the movie configuration, optionally seeks, then pulls
// access units from both tracks and prints what the demuxer hands a decoder.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use avdemux_core::aac::AacConfig;
use avdemux_core::demuxer::SNIFF_HEADER_SIZE;
use avdemux_core::h264_utils::AvcConfig;
use avdemux_core::mp4::TrackInfo;
use avdemux_core::{
    AccessUnit, AccessUnitSink, BufferPool, ByteRangeReader, DemuxerConfig, FileReader,
    Mp4Demuxer, TrackKind,
};

// ============================================================================
// Arguments
// ============================================================================

struct ProbeOptions {
    input: PathBuf,
    frames: u64,
    seek_ms: Option<i64>,
    json: bool,
    config: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<ProbeOptions> {
    let mut input: Option<PathBuf> = None;
    let mut frames: u64 = 10;
    let mut seek_ms = None;
    let mut json = false;
    let mut config = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--input" | "-i" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --input"))?;
                input = Some(PathBuf::from(value));
                i += 2;
            }
            "--frames" | "-n" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --frames"))?;
                frames = value
                    .parse::<u64>()
                    .map_err(|e| anyhow::anyhow!("Invalid frame count {}: {}", value, e))?;
                i += 2;
            }
            "--seek-ms" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --seek-ms"))?;
                seek_ms = Some(
                    value
                        .parse::<i64>()
                        .map_err(|e| anyhow::anyhow!("Invalid seek time {}: {}", value, e))?,
                );
                i += 2;
            }
            "--config" => {
                let value = args
                    .get(i + 1)
                    .ok_or_else(|| anyhow::anyhow!("Missing value for --config"))?;
                config = Some(PathBuf::from(value));
                i += 2;
            }
            "--json" => {
                json = true;
                i += 1;
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other => {
                return Err(anyhow::anyhow!("Unknown argument: {}", other));
            }
        }
    }

    let input = input.ok_or_else(|| {
        print_usage();
        anyhow::anyhow!("Missing required --input")
    })?;

    Ok(ProbeOptions {
        input,
        frames,
        seek_ms,
        json,
        config,
    })
}

fn print_usage() {
    eprintln!(
        "\nUsage:\n  avdemux-probe --input <file.mp4> [--frames <n>] [--seek-ms <ms>] [--json] [--config <file.json>]\n"
    );
}

// ============================================================================
// Sink
// ============================================================================

#[derive(Debug, Serialize)]
struct UnitRecord {
    #[serde(flatten)]
    unit: AccessUnit,
    payload_len: usize,
    /// First payload bytes, enough to see the ADTS sync word or start code.
    payload_head: Vec<u8>,
}

#[derive(Default)]
struct ProbeSink {
    units: Vec<UnitRecord>,
    ended: Vec<(TrackKind, i64)>,
}

impl AccessUnitSink for ProbeSink {
    fn deliver(&mut self, unit: &AccessUnit, payload: &[u8]) {
        self.units.push(UnitRecord {
            unit: *unit,
            payload_len: payload.len(),
            payload_head: payload[..payload.len().min(8)].to_vec(),
        });
    }

    fn end_of_stream(&mut self, kind: TrackKind, duration_us: i64) {
        self.ended.push((kind, duration_us));
    }
}

// ============================================================================
// Report
// ============================================================================

#[derive(Serialize)]
struct ProbeReport<'a> {
    file: String,
    file_size: u64,
    duration_us: i64,
    tracks: Vec<TrackInfo>,
    avc: Option<&'a AvcConfig>,
    aac: Option<&'a AacConfig>,
    units: &'a [UnitRecord],
}

fn print_text(report: &ProbeReport<'_>, ended: &[(TrackKind, i64)]) {
    println!("{} ({} bytes)", report.file, report.file_size);
    println!("  duration: {:.3} s", report.duration_us as f64 / 1_000_000.0);
    for track in &report.tracks {
        println!(
            "  {:?}: {} samples, timescale {} Hz, {:.3} s",
            track.kind,
            track.sample_count,
            track.timescale_hz,
            track.duration_us as f64 / 1_000_000.0
        );
    }
    if let Some(avc) = report.avc {
        println!(
            "  h264: profile {} level {}, {}-byte NAL lengths",
            avc.profile, avc.level, avc.nal_length_size
        );
    }
    if let Some(aac) = report.aac {
        println!(
            "  aac: object type {}, {} Hz, {} channels",
            aac.object_type, aac.sampling_frequency, aac.channel_configuration
        );
    }

    for record in report.units {
        let unit = &record.unit;
        println!(
            "  {:<5} pts {:>10} us  dur {:>7} us  @{:<10} {:>7} B{}",
            format!("{:?}", unit.kind).to_lowercase(),
            unit.timestamp_us,
            unit.duration_us,
            unit.offset,
            unit.size,
            if unit.is_keyframe { "  key" } else { "" }
        );
    }
    for (kind, duration_us) in ended {
        println!("  {:?}: end of stream at {} us", kind, duration_us);
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("avdemux=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let options = parse_args(&args)?;
    run(&options)
}

fn run(options: &ProbeOptions) -> Result<()> {
    let config = match &options.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("Reading config {:?}", path))?;
            DemuxerConfig::from_json(&json)?
        }
        None => DemuxerConfig::default(),
    };

    info!("avdemux probe v{}: {:?}", avdemux_core::VERSION, options.input);

    let file = File::open(&options.input).with_context(|| format!("Opening {:?}", options.input))?;
    let reader: Arc<dyn ByteRangeReader> = Arc::new(FileReader::new(BufReader::new(file))?);
    let pool = Arc::new(BufferPool::new(config.max_buffer_bytes, config.pool_buffers));

    let mut sniff = [0u8; SNIFF_HEADER_SIZE];
    let got = reader.read_at(0, &mut sniff)?;
    let mut demuxer = Mp4Demuxer::construct(reader.clone(), &sniff[..got], pool.clone(), &config)?
        .ok_or_else(|| anyhow::anyhow!("{:?} is not an MP4 file", options.input))?;

    if let Err(e) = demuxer.parse_config() {
        if e.is_parse_failure() {
            anyhow::bail!("{:?} is not a playable MP4: {}", options.input, e);
        }
        return Err(e).with_context(|| format!("Parsing MP4 configuration of {:?}", options.input));
    }

    if let Some(ms) = options.seek_ms {
        demuxer.seek_to(ms * 1000)?;
        info!(
            "Seeked to {} ms: video sample {}, audio sample {}",
            ms,
            demuxer.next_sample(TrackKind::Video),
            demuxer.next_sample(TrackKind::Audio)
        );
    }

    let mut sink = ProbeSink::default();
    for kind in [TrackKind::Video, TrackKind::Audio] {
        for _ in 0..options.frames {
            if !demuxer.pump(kind, &mut sink)? {
                break;
            }
        }
    }

    let tracks = [TrackKind::Video, TrackKind::Audio]
        .into_iter()
        .filter_map(|kind| demuxer.track_info(kind))
        .collect();
    let report = ProbeReport {
        file: options.input.display().to_string(),
        file_size: reader.file_size(),
        duration_us: demuxer.duration_us(),
        tracks,
        avc: demuxer.avc_config(),
        aac: demuxer.aac_config(),
        units: &sink.units,
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report, &sink.ended);
    }

    let stats = pool.stats();
    info!(
        "Buffer pool: {} available, {} allocated, {} recycled",
        stats.available, stats.total_allocated, stats.total_recycled
    );
    Ok(())
}
