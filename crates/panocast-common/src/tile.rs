//! # Tile Data Model
//!
//! A 360° video is split into segments (fixed-duration chunks) and each
//! segment into independently encoded tiles. A tile is addressed by
//! `(segment, tile, bitrate)`; the bitrate is always one of the values on the
//! session's [`BitrateLadder`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Segment number, starting at 1.
pub type SegmentId = u32;

/// Tile number, in `1..=tile_count`.
pub type TileId = u16;

// ─── Priority ────────────────────────────────────────────────────────────────

/// Viewport-derived request priority.
///
/// Assigned once, when the request is generated: tiles in the viewer's field
/// of view are `High`, everything else is `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Low,
}

impl Priority {
    /// Index into per-class arrays (`High` = 0, `Low` = 1).
    #[inline]
    pub fn class_index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => f.write_str("high"),
            Priority::Low => f.write_str("low"),
        }
    }
}

/// Numeric priority levels carried on the wire. Smaller means more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityLevels {
    pub high: u8,
    pub low: u8,
}

impl Default for PriorityLevels {
    fn default() -> Self {
        Self { high: 1, low: 2 }
    }
}

impl PriorityLevels {
    pub fn level(&self, priority: Priority) -> u8 {
        match priority {
            Priority::High => self.high,
            Priority::Low => self.low,
        }
    }

    pub fn priority(&self, level: u8) -> Option<Priority> {
        if level == self.high {
            Some(Priority::High)
        } else if level == self.low {
            Some(Priority::Low)
        } else {
            None
        }
    }
}

// ─── Keys & Requests ─────────────────────────────────────────────────────────

/// Address of one encoded tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileKey {
    pub segment: SegmentId,
    pub tile: TileId,
    pub bitrate_kbps: u32,
}

impl TileKey {
    pub fn new(segment: SegmentId, tile: TileId, bitrate_kbps: u32) -> Self {
        Self {
            segment,
            tile,
            bitrate_kbps,
        }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "seg{}/tile{}@{}kbps",
            self.segment, self.tile, self.bitrate_kbps
        )
    }
}

/// A prioritized request for one tile. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRequest {
    pub segment: SegmentId,
    pub tile: TileId,
    pub priority: Priority,
    pub bitrate_kbps: u32,
}

impl TileRequest {
    pub fn new(segment: SegmentId, tile: TileId, priority: Priority, bitrate_kbps: u32) -> Self {
        Self {
            segment,
            tile,
            priority,
            bitrate_kbps,
        }
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(self.segment, self.tile, self.bitrate_kbps)
    }
}

// ─── Bitrate Ladder ──────────────────────────────────────────────────────────

/// Strictly ascending set of quality levels, in kbps. Index 0 is the lowest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BitrateLadder {
    levels: Vec<u32>,
}

impl BitrateLadder {
    pub fn new(levels: Vec<u32>) -> Result<Self, ConfigError> {
        if levels.is_empty() {
            return Err(ConfigError::invalid("abr.ladder_kbps", "must not be empty"));
        }
        if levels.iter().any(|&l| l == 0) {
            return Err(ConfigError::invalid(
                "abr.ladder_kbps",
                "levels must be positive",
            ));
        }
        if levels.windows(2).any(|w| w[0] >= w[1]) {
            return Err(ConfigError::invalid(
                "abr.ladder_kbps",
                "levels must be strictly ascending",
            ));
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Bitrate of the given level, clamped to the top of the ladder.
    pub fn bitrate(&self, index: usize) -> u32 {
        self.levels[index.min(self.levels.len() - 1)]
    }

    /// Highest level whose bitrate does not exceed `kbps`, or level 0 when
    /// even the lowest level is above it.
    pub fn highest_within(&self, kbps: f64) -> usize {
        if !kbps.is_finite() || kbps <= 0.0 {
            return 0;
        }
        self.levels
            .iter()
            .rposition(|&level| f64::from(level) <= kbps)
            .unwrap_or(0)
    }

    pub fn contains(&self, kbps: u32) -> bool {
        self.levels.binary_search(&kbps).is_ok()
    }
}

impl Default for BitrateLadder {
    fn default() -> Self {
        Self {
            levels: vec![3000, 3500, 4000, 4500, 5000, 5500, 6000],
        }
    }
}
