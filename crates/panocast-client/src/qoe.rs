//! # QoE Aggregator
//!
//! Pure observer. Every played frame checks each tile of the current segment
//! against the local store at the segment's chosen bitrate and counts what
//! is missing, overall and within the FOV. Nothing here feeds back into ABR
//! or scheduling.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

use panocast_common::{MissingPolicy, SegmentId, TileId, TileKey, TileStore};

use crate::buffer::BufferSnapshot;
use crate::ledger::SegmentLedger;

/// `missing / total × 100`, rounded to two decimals. Zero when nothing was
/// checked.
pub fn missing_ratio(missing: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (missing as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TileCounters {
    pub total: u64,
    pub missing: u64,
}

impl TileCounters {
    fn record(&mut self, present: bool) {
        self.total += 1;
        if !present {
            self.missing += 1;
        }
    }

    pub fn ratio(&self) -> f64 {
        missing_ratio(self.missing, self.total)
    }
}

#[derive(Debug, Clone)]
struct SegmentCounters {
    bitrate_kbps: u32,
    eligible: BTreeSet<TileId>,
    all: TileCounters,
    fov: TileCounters,
}

pub struct QoeAggregator {
    policy: MissingPolicy,
    tile_count: u16,
    segments: BTreeMap<SegmentId, SegmentCounters>,
    all: TileCounters,
    fov: TileCounters,
    frames: u64,
}

impl QoeAggregator {
    pub fn new(policy: MissingPolicy, tile_count: u16) -> Self {
        Self {
            policy,
            tile_count,
            segments: BTreeMap::new(),
            all: TileCounters::default(),
            fov: TileCounters::default(),
            frames: 0,
        }
    }

    /// Registers the bitrate a segment was requested at and the tiles that
    /// count towards it under [`MissingPolicy::RequestedOnly`].
    pub fn begin_segment(
        &mut self,
        segment: SegmentId,
        bitrate_kbps: u32,
        eligible: impl IntoIterator<Item = TileId>,
    ) {
        self.segments.entry(segment).or_insert_with(|| SegmentCounters {
            bitrate_kbps,
            eligible: eligible.into_iter().collect(),
            all: TileCounters::default(),
            fov: TileCounters::default(),
        });
    }

    /// Scores one frame at its playout time. Frames of a segment that was
    /// never begun are ignored.
    pub fn observe_frame(&mut self, segment: SegmentId, fov: &[TileId], store: &dyn TileStore) {
        let Some(seg) = self.segments.get_mut(&segment) else {
            return;
        };
        self.frames += 1;
        for tile in 1..=self.tile_count {
            let counted = match self.policy {
                MissingPolicy::AllTiles => true,
                MissingPolicy::RequestedOnly => seg.eligible.contains(&tile),
            };
            if !counted {
                continue;
            }
            let present = store.exists(&TileKey::new(segment, tile, seg.bitrate_kbps));
            seg.all.record(present);
            self.all.record(present);
            if fov.contains(&tile) {
                seg.fov.record(present);
                self.fov.record(present);
            }
        }
    }

    pub fn overall(&self) -> TileCounters {
        self.all
    }

    pub fn fov(&self) -> TileCounters {
        self.fov
    }

    pub fn summary(
        &self,
        client_id: &str,
        ledger: &SegmentLedger,
        buffer: BufferSnapshot,
        termination: Termination,
    ) -> SessionSummary {
        let segments: Vec<SegmentSummary> = self
            .segments
            .iter()
            .map(|(&segment, counters)| {
                let stat = ledger.get(segment);
                SegmentSummary {
                    segment,
                    bitrate_kbps: counters.bitrate_kbps,
                    high_requests: stat.map_or(0, |s| s.high_requests),
                    low_requests: stat.map_or(0, |s| s.low_requests),
                    total_tiles: counters.all.total,
                    missing_tiles: counters.all.missing,
                    missing_ratio_pct: counters.all.ratio(),
                    fov_missing_ratio_pct: counters.fov.ratio(),
                    bytes: stat.map_or(0, |s| s.bytes),
                    download_secs: stat.map_or(0.0, |s| s.download_duration.as_secs_f64()),
                    complete: stat.is_some_and(|s| s.finalized),
                }
            })
            .collect();

        let average_bitrate_kbps = if segments.is_empty() {
            0.0
        } else {
            segments.iter().map(|s| f64::from(s.bitrate_kbps)).sum::<f64>() / segments.len() as f64
        };

        SessionSummary {
            client_id: client_id.to_owned(),
            termination,
            missing_policy: self.policy,
            frames_observed: self.frames,
            frames_played: buffer.consumed,
            total_tiles: self.all.total,
            missing_tiles: self.all.missing,
            missing_ratio_pct: self.all.ratio(),
            fov_tiles: self.fov.total,
            fov_missing_tiles: self.fov.missing,
            fov_missing_ratio_pct: self.fov.ratio(),
            average_bitrate_kbps,
            total_download_secs: ledger.total_download().as_secs_f64(),
            stall_count: buffer.stall_count,
            stalled_frames: buffer.stalled_ticks,
            segments,
        }
    }
}

// ─── Summary ─────────────────────────────────────────────────────────────────

/// Why the frame loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum Termination {
    Completed,
    TraceExhausted,
    TransportClosed,
    FramingFault(String),
    /// A received tile could not be written to the local store.
    StoreFault(String),
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => f.write_str("completed"),
            Termination::TraceExhausted => f.write_str("viewport trace exhausted"),
            Termination::TransportClosed => f.write_str("transport closed by server"),
            Termination::FramingFault(detail) => write!(f, "framing fault: {detail}"),
            Termination::StoreFault(detail) => write!(f, "tile store fault: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentSummary {
    pub segment: SegmentId,
    pub bitrate_kbps: u32,
    pub high_requests: usize,
    pub low_requests: usize,
    pub total_tiles: u64,
    pub missing_tiles: u64,
    pub missing_ratio_pct: f64,
    pub fov_missing_ratio_pct: f64,
    pub bytes: u64,
    pub download_secs: f64,
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub client_id: String,
    pub termination: Termination,
    pub missing_policy: MissingPolicy,
    pub frames_observed: u64,
    pub frames_played: u64,
    pub total_tiles: u64,
    pub missing_tiles: u64,
    pub missing_ratio_pct: f64,
    pub fov_tiles: u64,
    pub fov_missing_tiles: u64,
    pub fov_missing_ratio_pct: f64,
    pub average_bitrate_kbps: f64,
    pub total_download_secs: f64,
    pub stall_count: u64,
    /// Playout ticks spent waiting on a stall.
    pub stalled_frames: u64,
    pub segments: Vec<SegmentSummary>,
}
