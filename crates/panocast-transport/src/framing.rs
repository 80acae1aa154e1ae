//! # Envelope Framing
//!
//! ```text
//! +----------------+---------------------------+
//! | length u32 LE  | payload (length bytes)    |
//! +----------------+---------------------------+
//! ```
//!
//! A tile transfer is one `TileMeta` control envelope, zero or more data
//! envelopes, then a zero-length envelope. Nothing else may interleave.
//! Envelopes longer than the configured maximum are rejected before any
//! payload buffer is allocated.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{trace, warn};

use panocast_common::{FramingConfig, PriorityLevels, TileKey};

use crate::wire::{ControlMessage, MessageTag, TileMeta, WireError};

pub const HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("stream ended inside an envelope")]
    Truncated,
    #[error("envelope of {len} bytes exceeds maximum {max}")]
    Oversized { len: u64, max: usize },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("zero-length envelope outside a tile transfer")]
    UnexpectedTerminator,
    #[error("expected tile metadata, got {0:?}")]
    UnexpectedMessage(MessageTag),
    #[error("tile {key} chunks exceed declared length {declared}")]
    Overrun { key: TileKey, declared: u32 },
    #[error("tile {key} ended after {received} of {declared} bytes")]
    Underrun {
        key: TileKey,
        declared: u32,
        received: usize,
    },
    #[error("stream I/O: {0}")]
    Io(#[from] std::io::Error),
}

impl FramingError {
    /// Peer went away or the stream broke, as opposed to the peer sending
    /// something malformed.
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, FramingError::Truncated | FramingError::Io(_))
    }
}

// ─── Reader ──────────────────────────────────────────────────────────────────

pub struct FramedReader<R> {
    inner: R,
    max_envelope: usize,
    levels: PriorityLevels,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(inner: R, config: &FramingConfig) -> Self {
        Self {
            inner,
            max_envelope: config.max_envelope_bytes,
            levels: config.levels,
        }
    }

    /// Reads the next envelope payload. `Ok(None)` means the peer closed the
    /// stream cleanly on an envelope boundary.
    pub async fn read_envelope(&mut self) -> Result<Option<Bytes>, FramingError> {
        let mut header = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                return if filled == 0 {
                    Ok(None)
                } else {
                    Err(FramingError::Truncated)
                };
            }
            filled += n;
        }

        let len = u32::from_le_bytes(header) as usize;
        if len > self.max_envelope {
            warn!(len, max = self.max_envelope, "oversized envelope rejected");
            return Err(FramingError::Oversized {
                len: len as u64,
                max: self.max_envelope,
            });
        }
        if len == 0 {
            return Ok(Some(Bytes::new()));
        }

        let mut payload = BytesMut::zeroed(len);
        self.inner
            .read_exact(&mut payload)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::UnexpectedEof => FramingError::Truncated,
                _ => FramingError::Io(e),
            })?;
        Ok(Some(payload.freeze()))
    }

    /// Reads and decodes one control envelope.
    pub async fn read_control(&mut self) -> Result<Option<ControlMessage>, FramingError> {
        match self.read_envelope().await? {
            None => Ok(None),
            Some(mut payload) => Ok(Some(ControlMessage::decode(&mut payload, &self.levels)?)),
        }
    }
}

// ─── Tile receive state machine ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedTile {
    pub meta: TileMeta,
    pub data: Bytes,
}

impl ReceivedTile {
    pub fn key(&self) -> TileKey {
        self.meta.key()
    }
}

enum RecvState {
    AwaitingMeta,
    Receiving { meta: TileMeta, buf: BytesMut },
}

/// Reassembles tile transfers from a stream of envelopes.
pub struct TileReceiver<R> {
    reader: FramedReader<R>,
    state: RecvState,
}

impl<R: AsyncRead + Unpin> TileReceiver<R> {
    pub fn new(reader: FramedReader<R>) -> Self {
        Self {
            reader,
            state: RecvState::AwaitingMeta,
        }
    }

    /// Next complete tile. `Ok(None)` when the stream closes between
    /// transfers; closing mid-transfer is [`FramingError::Truncated`].
    pub async fn next_tile(&mut self) -> Result<Option<ReceivedTile>, FramingError> {
        loop {
            let Some(mut payload) = self.reader.read_envelope().await? else {
                return match self.state {
                    RecvState::AwaitingMeta => Ok(None),
                    RecvState::Receiving { .. } => Err(FramingError::Truncated),
                };
            };

            match &mut self.state {
                RecvState::AwaitingMeta => {
                    if payload.is_empty() {
                        return Err(FramingError::UnexpectedTerminator);
                    }
                    let meta = match ControlMessage::decode(&mut payload, &self.reader.levels)? {
                        ControlMessage::Meta(meta) => meta,
                        other => return Err(FramingError::UnexpectedMessage(other.tag())),
                    };
                    trace!(key = %meta.key(), length = meta.length, "tile transfer started");
                    let capacity = (meta.length as usize).min(self.reader.max_envelope);
                    self.state = RecvState::Receiving {
                        meta,
                        buf: BytesMut::with_capacity(capacity),
                    };
                }
                RecvState::Receiving { meta, buf } if payload.is_empty() => {
                    let meta = *meta;
                    if buf.len() != meta.length as usize {
                        warn!(
                            key = %meta.key(),
                            declared = meta.length,
                            received = buf.len(),
                            "tile underrun"
                        );
                        return Err(FramingError::Underrun {
                            key: meta.key(),
                            declared: meta.length,
                            received: buf.len(),
                        });
                    }
                    let data = std::mem::take(buf).freeze();
                    self.state = RecvState::AwaitingMeta;
                    trace!(key = %meta.key(), bytes = data.len(), "tile transfer complete");
                    return Ok(Some(ReceivedTile { meta, data }));
                }
                RecvState::Receiving { meta, buf } => {
                    if buf.len() + payload.len() > meta.length as usize {
                        warn!(key = %meta.key(), declared = meta.length, "tile overrun");
                        return Err(FramingError::Overrun {
                            key: meta.key(),
                            declared: meta.length,
                        });
                    }
                    buf.extend_from_slice(&payload);
                }
            }
        }
    }
}

// ─── Writer ──────────────────────────────────────────────────────────────────

pub struct FramedWriter<W> {
    inner: W,
    config: FramingConfig,
    scratch: BytesMut,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(inner: W, config: &FramingConfig) -> Self {
        Self {
            inner,
            config: *config,
            scratch: BytesMut::with_capacity(64),
        }
    }

    pub async fn write_envelope(&mut self, payload: &[u8]) -> Result<(), FramingError> {
        if payload.len() > self.config.max_envelope_bytes {
            return Err(FramingError::Oversized {
                len: payload.len() as u64,
                max: self.config.max_envelope_bytes,
            });
        }
        let header = (payload.len() as u32).to_le_bytes();
        self.inner.write_all(&header).await?;
        if !payload.is_empty() {
            self.inner.write_all(payload).await?;
        }
        Ok(())
    }

    pub async fn send_control(&mut self, msg: &ControlMessage) -> Result<(), FramingError> {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        let result = match msg.encode(&self.config.levels, &mut scratch) {
            Ok(()) => self.write_envelope(&scratch).await,
            Err(e) => Err(e.into()),
        };
        self.scratch = scratch;
        result
    }

    /// Sends one tile: metadata, data chunks, then the zero-length terminator.
    pub async fn send_tile(&mut self, key: TileKey, data: &[u8]) -> Result<(), FramingError> {
        let length = u32::try_from(data.len()).map_err(|_| FramingError::Oversized {
            len: data.len() as u64,
            max: u32::MAX as usize,
        })?;
        self.send_control(&ControlMessage::Meta(TileMeta::for_tile(key, length)))
            .await?;
        for chunk in data.chunks(self.config.chunk_bytes) {
            self.write_envelope(chunk).await?;
        }
        self.write_envelope(&[]).await
    }

    pub async fn flush(&mut self) -> Result<(), FramingError> {
        self.inner.flush().await?;
        Ok(())
    }

    /// Flushes and closes the write direction.
    pub async fn shutdown(&mut self) -> Result<(), FramingError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
