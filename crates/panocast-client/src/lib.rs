//! # panocast-client
//!
//! Viewer side of a tiled 360° session. Each frame the client consults the
//! viewport trace; at every segment boundary it asks the ABR controller for
//! a bitrate and requests the segment's tiles, FOV first. A receiver task
//! stores incoming tiles while the frame loop plays out and scores QoE.
//!
//! - [`trace`] — Viewport trace input (per-frame visible tile ids)
//! - [`ledger`] — Per-segment download record
//! - [`abr`] — Bitrate selection from download history
//! - [`buffer`] — Playback buffer and stall detection
//! - [`generator`] — Segment-boundary request planning
//! - [`qoe`] — Missing-tile accounting and the session summary
//! - [`session`] — The frame loop tying it together

pub mod abr;
pub mod buffer;
pub mod generator;
pub mod ledger;
pub mod qoe;
pub mod session;
pub mod trace;

pub use abr::AbrController;
pub use buffer::{BufferSnapshot, PlaybackBuffer, PlayoutTick};
pub use generator::{RequestGenerator, RequestPlan};
pub use ledger::{SegmentLedger, SegmentStat};
pub use qoe::{QoeAggregator, SegmentSummary, SessionSummary, Termination};
pub use session::{run, SessionError};
pub use trace::{TraceError, ViewportTrace};
