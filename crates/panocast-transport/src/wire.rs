//! # Control Message Encoding
//!
//! Payload of a control envelope:
//!
//! ```text
//! +---------+---------+----------------------------+
//! | ver (8) | tag (8) | fields (little-endian)     |
//! +---------+---------+----------------------------+
//!
//! Hello        0x01  id_len u8, id bytes (UTF-8)
//! TileRequest  0x02  segment u32, tile u16, priority u8, bitrate_kbps u32
//! EndOfSession 0x03  (no fields)
//! TileMeta     0x04  segment u32, tile u16, bitrate_kbps u32, length u32
//! ```
//!
//! Decoding is strict: unknown versions or tags, short fields and trailing
//! bytes are all rejected.

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use panocast_common::{PriorityLevels, SegmentId, TileId, TileKey, TileRequest};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Control encoding version.
pub const WIRE_VERSION: u8 = 1;

/// Longest client identifier accepted in a hello.
pub const MAX_CLIENT_ID_LEN: usize = u8::MAX as usize;

const TILE_REQUEST_LEN: usize = 4 + 2 + 1 + 4;
const TILE_META_LEN: usize = 4 + 2 + 4 + 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    Hello = 0x01,
    TileRequest = 0x02,
    EndOfSession = 0x03,
    TileMeta = 0x04,
}

impl MessageTag {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(MessageTag::Hello),
            0x02 => Some(MessageTag::TileRequest),
            0x03 => Some(MessageTag::EndOfSession),
            0x04 => Some(MessageTag::TileMeta),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("empty control payload")]
    Empty,
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    #[error("truncated {0:?} message")]
    Truncated(MessageTag),
    #[error("{0} trailing bytes after {1:?} message")]
    TrailingBytes(usize, MessageTag),
    #[error("invalid {field}: {value}")]
    InvalidField { field: &'static str, value: u64 },
    #[error("client id of {0} bytes exceeds 255")]
    ClientIdTooLong(usize),
    #[error("client id is not valid UTF-8")]
    ClientIdEncoding,
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// Metadata sent ahead of a tile's data chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileMeta {
    pub segment: SegmentId,
    pub tile: TileId,
    pub bitrate_kbps: u32,
    /// Total payload length that the following chunks add up to.
    pub length: u32,
}

impl TileMeta {
    pub fn for_tile(key: TileKey, length: u32) -> Self {
        Self {
            segment: key.segment,
            tile: key.tile,
            bitrate_kbps: key.bitrate_kbps,
            length,
        }
    }

    pub fn key(&self) -> TileKey {
        TileKey::new(self.segment, self.tile, self.bitrate_kbps)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// First message on every session, identifying the client.
    Hello { client_id: String },
    Request(TileRequest),
    EndOfSession,
    Meta(TileMeta),
}

impl ControlMessage {
    pub fn tag(&self) -> MessageTag {
        match self {
            ControlMessage::Hello { .. } => MessageTag::Hello,
            ControlMessage::Request(_) => MessageTag::TileRequest,
            ControlMessage::EndOfSession => MessageTag::EndOfSession,
            ControlMessage::Meta(_) => MessageTag::TileMeta,
        }
    }

    pub fn encode(&self, levels: &PriorityLevels, buf: &mut BytesMut) -> Result<(), WireError> {
        buf.put_u8(WIRE_VERSION);
        buf.put_u8(self.tag() as u8);
        match self {
            ControlMessage::Hello { client_id } => {
                let id = client_id.as_bytes();
                if id.len() > MAX_CLIENT_ID_LEN {
                    return Err(WireError::ClientIdTooLong(id.len()));
                }
                buf.put_u8(id.len() as u8);
                buf.put_slice(id);
            }
            ControlMessage::Request(req) => {
                buf.put_u32_le(req.segment);
                buf.put_u16_le(req.tile);
                buf.put_u8(levels.level(req.priority));
                buf.put_u32_le(req.bitrate_kbps);
            }
            ControlMessage::EndOfSession => {}
            ControlMessage::Meta(meta) => {
                buf.put_u32_le(meta.segment);
                buf.put_u16_le(meta.tile);
                buf.put_u32_le(meta.bitrate_kbps);
                buf.put_u32_le(meta.length);
            }
        }
        Ok(())
    }

    /// Decodes exactly one message; the buffer must hold nothing else.
    pub fn decode(buf: &mut impl Buf, levels: &PriorityLevels) -> Result<Self, WireError> {
        if buf.remaining() < 2 {
            return Err(WireError::Empty);
        }
        let version = buf.get_u8();
        if version != WIRE_VERSION {
            return Err(WireError::UnsupportedVersion(version));
        }
        let raw_tag = buf.get_u8();
        let tag = MessageTag::from_byte(raw_tag).ok_or(WireError::UnknownTag(raw_tag))?;

        let msg = match tag {
            MessageTag::Hello => {
                if !buf.has_remaining() {
                    return Err(WireError::Truncated(tag));
                }
                let len = buf.get_u8() as usize;
                if buf.remaining() < len {
                    return Err(WireError::Truncated(tag));
                }
                let raw = buf.copy_to_bytes(len);
                let client_id = std::str::from_utf8(&raw)
                    .map_err(|_| WireError::ClientIdEncoding)?
                    .to_owned();
                ControlMessage::Hello { client_id }
            }
            MessageTag::TileRequest => {
                if buf.remaining() < TILE_REQUEST_LEN {
                    return Err(WireError::Truncated(tag));
                }
                let segment = nonzero_segment(buf.get_u32_le())?;
                let tile = nonzero_tile(buf.get_u16_le())?;
                let level = buf.get_u8();
                let priority = levels.priority(level).ok_or(WireError::InvalidField {
                    field: "priority",
                    value: u64::from(level),
                })?;
                let bitrate_kbps = buf.get_u32_le();
                ControlMessage::Request(TileRequest::new(segment, tile, priority, bitrate_kbps))
            }
            MessageTag::EndOfSession => ControlMessage::EndOfSession,
            MessageTag::TileMeta => {
                if buf.remaining() < TILE_META_LEN {
                    return Err(WireError::Truncated(tag));
                }
                ControlMessage::Meta(TileMeta {
                    segment: nonzero_segment(buf.get_u32_le())?,
                    tile: nonzero_tile(buf.get_u16_le())?,
                    bitrate_kbps: buf.get_u32_le(),
                    length: buf.get_u32_le(),
                })
            }
        };

        if buf.has_remaining() {
            return Err(WireError::TrailingBytes(buf.remaining(), tag));
        }
        Ok(msg)
    }
}

fn nonzero_segment(segment: u32) -> Result<SegmentId, WireError> {
    if segment == 0 {
        return Err(WireError::InvalidField {
            field: "segment",
            value: 0,
        });
    }
    Ok(segment)
}

fn nonzero_tile(tile: u16) -> Result<TileId, WireError> {
    if tile == 0 {
        return Err(WireError::InvalidField {
            field: "tile",
            value: 0,
        });
    }
    Ok(tile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use panocast_common::Priority;

    fn encode(msg: &ControlMessage) -> BytesMut {
        let mut buf = BytesMut::new();
        msg.encode(&PriorityLevels::default(), &mut buf).unwrap();
        buf
    }

    #[test]
    fn tile_request_roundtrip() {
        let req = TileRequest::new(6, 199, Priority::Low, 5500);
        let mut buf = encode(&ControlMessage::Request(req));
        assert_eq!(buf.len(), 2 + TILE_REQUEST_LEN);
        let decoded = ControlMessage::decode(&mut buf, &PriorityLevels::default()).unwrap();
        assert_eq!(decoded, ControlMessage::Request(req));
    }

    #[test]
    fn request_layout_is_little_endian() {
        let req = TileRequest::new(0x0102_0304, 0x0506, Priority::High, 3000);
        let buf = encode(&ControlMessage::Request(req));
        assert_eq!(&buf[..8], &[WIRE_VERSION, 0x02, 0x04, 0x03, 0x02, 0x01, 0x06, 0x05]);
        assert_eq!(buf[8], 1);
    }

    #[test]
    fn priority_uses_configured_levels() {
        let levels = PriorityLevels { high: 5, low: 10 };
        let mut buf = BytesMut::new();
        ControlMessage::Request(TileRequest::new(1, 1, Priority::Low, 3000))
            .encode(&levels, &mut buf)
            .unwrap();
        assert_eq!(buf[8], 10);

        let err = ControlMessage::decode(&mut buf.clone(), &PriorityLevels::default()).unwrap_err();
        assert_eq!(
            err,
            WireError::InvalidField {
                field: "priority",
                value: 10
            }
        );
        let ok = ControlMessage::decode(&mut buf, &levels).unwrap();
        assert!(matches!(ok, ControlMessage::Request(r) if r.priority == Priority::Low));
    }

    #[test]
    fn hello_and_meta_roundtrip() {
        for msg in [
            ControlMessage::Hello {
                client_id: "client-1".into(),
            },
            ControlMessage::EndOfSession,
            ControlMessage::Meta(TileMeta::for_tile(TileKey::new(3, 42, 4000), 123_456)),
        ] {
            let mut buf = encode(&msg);
            assert_eq!(
                ControlMessage::decode(&mut buf, &PriorityLevels::default()).unwrap(),
                msg
            );
        }
    }

    #[test]
    fn rejects_malformed_payloads() {
        let levels = PriorityLevels::default();
        assert_eq!(
            ControlMessage::decode(&mut &[0u8; 0][..], &levels),
            Err(WireError::Empty)
        );
        assert_eq!(
            ControlMessage::decode(&mut &[9u8, 0x03][..], &levels),
            Err(WireError::UnsupportedVersion(9))
        );
        assert_eq!(
            ControlMessage::decode(&mut &[WIRE_VERSION, 0x7F][..], &levels),
            Err(WireError::UnknownTag(0x7F))
        );
        assert_eq!(
            ControlMessage::decode(&mut &[WIRE_VERSION, 0x02, 1, 0][..], &levels),
            Err(WireError::Truncated(MessageTag::TileRequest))
        );
        assert_eq!(
            ControlMessage::decode(&mut &[WIRE_VERSION, 0x03, 0xAA][..], &levels),
            Err(WireError::TrailingBytes(1, MessageTag::EndOfSession))
        );

        let mut zero_tile = encode(&ControlMessage::Request(TileRequest::new(
            1,
            1,
            Priority::High,
            3000,
        )));
        zero_tile[6] = 0;
        zero_tile[7] = 0;
        assert_eq!(
            ControlMessage::decode(&mut zero_tile, &levels),
            Err(WireError::InvalidField {
                field: "tile",
                value: 0
            })
        );
    }

    #[test]
    fn hello_rejects_oversized_id() {
        let msg = ControlMessage::Hello {
            client_id: "x".repeat(MAX_CLIENT_ID_LEN + 1),
        };
        let mut buf = BytesMut::new();
        assert_eq!(
            msg.encode(&PriorityLevels::default(), &mut buf),
            Err(WireError::ClientIdTooLong(MAX_CLIENT_ID_LEN + 1))
        );
    }
}
