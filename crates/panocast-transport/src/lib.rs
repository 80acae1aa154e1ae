//! # panocast-transport
//!
//! Framing protocol carried over one reliable, ordered byte stream.
//!
//! Every logical message is a `u32` little-endian length followed by that
//! many payload bytes. Control messages (hello, tile request, end of session,
//! tile metadata) use a versioned tagged encoding; tile payloads follow their
//! metadata envelope as a run of data chunks closed by a zero-length
//! envelope.
//!
//! ## Crate structure
//!
//! - [`wire`] — Control message encoding and decoding
//! - [`framing`] — Async envelope reader/writer and the tile transfer state machine

pub mod framing;
pub mod wire;

pub use framing::{FramedReader, FramedWriter, FramingError, ReceivedTile, TileReceiver};
pub use wire::{ControlMessage, TileMeta, WireError, WIRE_VERSION};
