//! MP4 track classification and timing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// `hdlr` handler subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerType {
    Video,
    Audio,
    Other([u8; 4]),
}

impl HandlerType {
    pub fn from_subtype(subtype: [u8; 4]) -> Self {
        match &subtype {
            b"vide" => HandlerType::Video,
            b"soun" => HandlerType::Audio,
            _ => HandlerType::Other(subtype),
        }
    }
}

/// Timescale and duration from an `mdhd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaTiming {
    pub timescale_hz: u32,
    pub duration_ticks: u64,
}

impl MediaTiming {
    pub fn duration_us(&self) -> i64 {
        ticks_to_us(self.duration_ticks, self.timescale_hz)
    }

    /// One tick of this timescale, in microseconds.
    pub fn one_tick_us(&self) -> i64 {
        1_000_000 / self.timescale_hz as i64
    }
}

/// Classification state of the `trak` currently being walked.
///
/// `mdhd` usually precedes `hdlr`, so timing seen while unclassified is held
/// here and released exactly once, when the handler type becomes known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrakState {
    #[default]
    Outside,
    Unclassified { pending: Option<MediaTiming> },
    Classified(TrackKind),
    Ignored,
}

impl TrakState {
    /// A new `trak` box starts.
    pub fn enter_trak(&mut self) {
        *self = TrakState::Unclassified { pending: None };
    }

    /// Apply an `hdlr`. Returns buffered timing that must now be committed
    /// to the newly classified track.
    pub fn classify(&mut self, handler: HandlerType) -> Option<(TrackKind, MediaTiming)> {
        let pending = match *self {
            TrakState::Unclassified { pending } => pending,
            _ => None,
        };
        let kind = match handler {
            HandlerType::Video => Some(TrackKind::Video),
            HandlerType::Audio => Some(TrackKind::Audio),
            HandlerType::Other(_) => None,
        };
        *self = match kind {
            Some(kind) => TrakState::Classified(kind),
            None => TrakState::Ignored,
        };
        kind.zip(pending)
    }

    /// Apply an `mdhd`. Returns the timing to commit now if the track is
    /// already classified, otherwise buffers it.
    pub fn observe_timing(&mut self, timing: MediaTiming) -> Option<(TrackKind, MediaTiming)> {
        match self {
            TrakState::Classified(kind) => Some((*kind, timing)),
            TrakState::Unclassified { pending } => {
                *pending = Some(timing);
                None
            }
            // mdhd outside a trak has no track to belong to
            TrakState::Outside | TrakState::Ignored => None,
        }
    }

    pub fn kind(&self) -> Option<TrackKind> {
        match self {
            TrakState::Classified(kind) => Some(*kind),
            _ => None,
        }
    }
}

/// Convert `ticks` at `timescale_hz` to microseconds, truncating.
pub fn ticks_to_us(ticks: u64, timescale_hz: u32) -> i64 {
    debug_assert!(timescale_hz > 0);
    (ticks as u128 * 1_000_000 / timescale_hz as u128) as i64
}

/// Convert microseconds to ticks at `timescale_hz`: the last tick whose
/// [`ticks_to_us`] is not after `us`, so converting back never lands later.
/// Negative times clamp to zero.
pub fn us_to_ticks(us: i64, timescale_hz: u32) -> u64 {
    debug_assert!(timescale_hz > 0);
    let us = us.max(0) as u128;
    (((us + 1) * timescale_hz as u128 - 1) / 1_000_000) as u64
}
