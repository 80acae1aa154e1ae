//! # Tile Store
//!
//! Maps `(segment, tile, bitrate)` to encoded tile bytes. Entries are
//! insert-once: a second `put` for the same key is a no-op, so readers never
//! observe a tile changing underneath them.
//!
//! Two backends:
//! - [`MemoryTileStore`] — concurrent map, used by tests and simulations
//! - [`DirTileStore`] — one file per tile under a root directory

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::tile::TileKey;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tile store I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where a stored tile can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileHandle {
    File(PathBuf),
    Memory(Bytes),
}

/// Insert-once tile lookup shared between one writer and many readers.
pub trait TileStore: Send + Sync {
    fn exists(&self, key: &TileKey) -> bool;

    /// Stores `bytes` under `key`. Returns `false` when the key was already
    /// present, in which case the existing bytes are kept.
    fn put(&self, key: TileKey, bytes: Bytes) -> Result<bool, StoreError>;

    fn get(&self, key: &TileKey) -> Result<Option<Bytes>, StoreError>;

    /// Size in bytes of a stored tile.
    fn size(&self, key: &TileKey) -> Option<u64>;

    fn handle(&self, key: &TileKey) -> Option<TileHandle>;
}

// ─── Memory ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryTileStore {
    tiles: DashMap<TileKey, Bytes>,
}

impl MemoryTileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

impl TileStore for MemoryTileStore {
    fn exists(&self, key: &TileKey) -> bool {
        self.tiles.contains_key(key)
    }

    fn put(&self, key: TileKey, bytes: Bytes) -> Result<bool, StoreError> {
        match self.tiles.entry(key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(bytes);
                Ok(true)
            }
        }
    }

    fn get(&self, key: &TileKey) -> Result<Option<Bytes>, StoreError> {
        Ok(self.tiles.get(key).map(|entry| entry.value().clone()))
    }

    fn size(&self, key: &TileKey) -> Option<u64> {
        self.tiles.get(key).map(|entry| entry.value().len() as u64)
    }

    fn handle(&self, key: &TileKey) -> Option<TileHandle> {
        self.tiles
            .get(key)
            .map(|entry| TileHandle::Memory(entry.value().clone()))
    }
}

// ─── Directory ───────────────────────────────────────────────────────────────

/// Filesystem store laid out as `<root>/<bitrate>/seg<segment>_tile<tile>.m4s`.
///
/// Writes go to a temporary file that is renamed into place, so a tile is
/// visible to `exists` only once it is complete.
#[derive(Debug, Clone)]
pub struct DirTileStore {
    root: PathBuf,
}

impl DirTileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, key: &TileKey) -> PathBuf {
        self.root
            .join(key.bitrate_kbps.to_string())
            .join(format!("seg{}_tile{}.m4s", key.segment, key.tile))
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl TileStore for DirTileStore {
    fn exists(&self, key: &TileKey) -> bool {
        self.path_for(key).is_file()
    }

    fn put(&self, key: TileKey, bytes: Bytes) -> Result<bool, StoreError> {
        let path = self.path_for(&key);
        if path.is_file() {
            return Ok(false);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err(dir))?;
        }
        let tmp = path.with_extension("m4s.part");
        fs::write(&tmp, &bytes).map_err(io_err(&tmp))?;
        fs::rename(&tmp, &path).map_err(io_err(&path))?;
        tracing::trace!(%key, path = %path.display(), bytes = bytes.len(), "tile stored");
        Ok(true)
    }

    fn get(&self, key: &TileKey) -> Result<Option<Bytes>, StoreError> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    fn size(&self, key: &TileKey) -> Option<u64> {
        fs::metadata(self.path_for(key)).ok().map(|m| m.len())
    }

    fn handle(&self, key: &TileKey) -> Option<TileHandle> {
        let path = self.path_for(key);
        path.is_file().then_some(TileHandle::File(path))
    }
}
