//! # Segment Ledger
//!
//! One [`SegmentStat`] per requested segment, keyed by segment id and only
//! ever appended to. A stat is opened when the segment's requests go out,
//! grows as tiles arrive, and is finalized once every requested tile has
//! been delivered.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use panocast_common::{SegmentId, TileId, TileKey};

#[derive(Debug, Clone, Serialize)]
pub struct SegmentStat {
    pub segment: SegmentId,
    pub bitrate_kbps: u32,
    pub high_requests: usize,
    pub low_requests: usize,
    /// Time from request to the latest delivery.
    #[serde(serialize_with = "as_secs")]
    pub download_duration: Duration,
    pub bytes: u64,
    pub finalized: bool,
    #[serde(skip)]
    requested_at: Instant,
    #[serde(skip)]
    outstanding: BTreeSet<TileId>,
}

fn as_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl SegmentStat {
    /// Observed throughput in kbps, if anything measurable has arrived.
    pub fn throughput_kbps(&self) -> Option<f64> {
        let secs = self.download_duration.as_secs_f64();
        if self.bytes == 0 || secs <= 0.0 {
            return None;
        }
        Some(self.bytes as f64 * 8.0 / 1000.0 / secs)
    }
}

#[derive(Debug, Default)]
pub struct SegmentLedger {
    stats: BTreeMap<SegmentId, SegmentStat>,
}

impl SegmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the requests sent for `segment`. Returns `true` when nothing
    /// was requested, in which case the stat is already final.
    ///
    /// Reopening an existing segment is ignored.
    pub fn open(
        &mut self,
        segment: SegmentId,
        bitrate_kbps: u32,
        high: &[TileId],
        low: &[TileId],
        now: Instant,
    ) -> bool {
        let outstanding: BTreeSet<TileId> = high.iter().chain(low).copied().collect();
        let finalized = outstanding.is_empty();
        self.stats.entry(segment).or_insert(SegmentStat {
            segment,
            bitrate_kbps,
            high_requests: high.len(),
            low_requests: low.len(),
            download_duration: Duration::ZERO,
            bytes: 0,
            finalized,
            requested_at: now,
            outstanding,
        });
        finalized
    }

    /// Credits a delivered tile. Returns the segment id when this delivery
    /// completed the segment.
    pub fn record_delivery(&mut self, key: TileKey, bytes: u64, at: Instant) -> Option<SegmentId> {
        let stat = self.stats.get_mut(&key.segment)?;
        if stat.finalized || stat.bitrate_kbps != key.bitrate_kbps {
            return None;
        }
        if !stat.outstanding.remove(&key.tile) {
            return None;
        }
        stat.bytes += bytes;
        stat.download_duration = at.saturating_duration_since(stat.requested_at);
        if stat.outstanding.is_empty() {
            stat.finalized = true;
            return Some(key.segment);
        }
        None
    }

    pub fn get(&self, segment: SegmentId) -> Option<&SegmentStat> {
        self.stats.get(&segment)
    }

    /// Stats for segments before `segment`, most recent first.
    pub fn recent_before(&self, segment: SegmentId) -> impl Iterator<Item = &SegmentStat> {
        self.stats.range(..segment).rev().map(|(_, stat)| stat)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SegmentStat> {
        self.stats.values()
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn total_download(&self) -> Duration {
        self.stats.values().map(|s| s.download_duration).sum()
    }
}
