//! Viewport trace: one CSV row per frame, `frame,tile,tile,...`.
//!
//! A first line whose leading field is not a number is a header. Blank
//! lines and empty fields are ignored. Frames are taken in row order.

use std::path::{Path, PathBuf};

use thiserror::Error;

use panocast_common::TileId;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("failed to read trace {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("trace line {line}: {reason}")]
    Parse { line: usize, reason: String },
    #[error("trace line {line}: tile {tile} outside 1..={tile_count}")]
    TileOutOfRange {
        line: usize,
        tile: u64,
        tile_count: u16,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewportTrace {
    frames: Vec<Vec<TileId>>,
}

impl ViewportTrace {
    pub fn new(frames: Vec<Vec<TileId>>) -> Self {
        Self { frames }
    }

    pub fn parse(text: &str, tile_count: u16) -> Result<Self, TraceError> {
        let mut frames = Vec::new();
        let mut seen_row = false;

        for (idx, raw) in text.lines().enumerate() {
            let line = idx + 1;
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }
            let mut fields = raw.split(',').map(str::trim);
            let first = fields.next().unwrap_or_default();
            if first.parse::<u64>().is_err() {
                if !seen_row {
                    seen_row = true;
                    continue;
                }
                return Err(TraceError::Parse {
                    line,
                    reason: format!("frame number {first:?} is not an integer"),
                });
            }
            seen_row = true;

            let mut tiles = Vec::new();
            for field in fields.filter(|f| !f.is_empty()) {
                let tile: u64 = field.parse().map_err(|_| TraceError::Parse {
                    line,
                    reason: format!("tile id {field:?} is not an integer"),
                })?;
                if tile == 0 || tile > u64::from(tile_count) {
                    return Err(TraceError::TileOutOfRange {
                        line,
                        tile,
                        tile_count,
                    });
                }
                tiles.push(tile as TileId);
            }
            frames.push(tiles);
        }

        Ok(Self { frames })
    }

    pub fn from_path(path: impl AsRef<Path>, tile_count: u16) -> Result<Self, TraceError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TraceError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, tile_count)
    }

    /// Visible tiles for `frame`, or `None` past the end of the trace.
    pub fn fov(&self, frame: u64) -> Option<&[TileId]> {
        usize::try_from(frame)
            .ok()
            .and_then(|f| self.frames.get(f))
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
