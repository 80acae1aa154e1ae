//! Shared types for panocast.
//!
//! This crate contains:
//! - **Tile data model** — requests, priorities, keys and the bitrate ladder
//! - **Tile store** — insert-once `(segment, tile, bitrate)` → bytes lookup
//! - **Configuration** — TOML session configuration with validation

pub mod config;
pub mod store;
pub mod tile;

pub use config::{
    AbrAlgorithm, AbrConfig, ConfigError, FramingConfig, MissingPolicy, QoeConfig,
    QueueDiscipline, RequestScope, SchedulerConfig, SessionConfig, VideoConfig,
};
pub use store::{DirTileStore, MemoryTileStore, StoreError, TileHandle, TileStore};
pub use tile::{BitrateLadder, Priority, PriorityLevels, SegmentId, TileId, TileKey, TileRequest};
