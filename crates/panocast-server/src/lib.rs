//! # panocast-server
//!
//! Serves prioritized tile requests from a [`TileStore`](panocast_common::TileStore)
//! over one framed byte stream per client.
//!
//! - [`scheduler`] — FIFO, strict-priority and weighted-fair queue disciplines
//! - [`session`] — per-connection loop: one reader task feeding a single
//!   queue owner that serves tiles in discipline order

pub mod scheduler;
pub mod session;

pub use scheduler::{Discipline, QueueEntry, Scheduler, SchedulerStats, ServicePhase};
pub use session::{serve, ServerReport, SessionError};
