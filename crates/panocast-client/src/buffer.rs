//! # Playback Buffer
//!
//! Rate matching between tile arrival (producer) and the playout clock
//! (consumer), counted in frames. The buffer is a plain state machine owned
//! by the frame loop and mutated only through [`PlaybackBuffer::record_arrival`]
//! and [`PlaybackBuffer::tick`]; everything else reads [`BufferSnapshot`]s.
//!
//! `consumed <= produced` always holds. A tick with nothing left to play
//! does not advance `consumed`; it marks the buffer stalled instead, and the
//! stall lasts until the next arrival.

use serde::Serialize;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BufferSnapshot {
    pub produced: u64,
    pub consumed: u64,
    pub stalled: bool,
    pub stall_count: u64,
    /// Ticks spent stalled.
    pub stalled_ticks: u64,
}

impl BufferSnapshot {
    pub fn backlog(&self) -> u64 {
        self.produced - self.consumed
    }
}

/// Result of one playout tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayoutTick {
    Played,
    /// Playout just ran dry; a new stall episode began.
    StallStarted,
    /// Still waiting on an earlier stall.
    Stalled,
}

#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    frames_per_arrival: u64,
    state: BufferSnapshot,
}

impl PlaybackBuffer {
    pub fn new(frames_per_arrival: u32) -> Self {
        Self {
            frames_per_arrival: u64::from(frames_per_arrival.max(1)),
            state: BufferSnapshot::default(),
        }
    }

    /// One unit of content became playable. Returns `true` if this ended a
    /// stall.
    pub fn record_arrival(&mut self) -> bool {
        self.state.produced += self.frames_per_arrival;
        if self.state.stalled && self.state.produced > self.state.consumed {
            self.state.stalled = false;
            return true;
        }
        false
    }

    /// Advances the playout clock by one frame.
    pub fn tick(&mut self) -> PlayoutTick {
        if self.state.consumed < self.state.produced {
            self.state.consumed += 1;
            return PlayoutTick::Played;
        }
        self.state.stalled_ticks += 1;
        if self.state.stalled {
            PlayoutTick::Stalled
        } else {
            self.state.stalled = true;
            self.state.stall_count += 1;
            PlayoutTick::StallStarted
        }
    }

    pub fn snapshot(&self) -> BufferSnapshot {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starving_buffer_counts_one_stall_per_episode() {
        let mut buf = PlaybackBuffer::new(30);
        assert_eq!(buf.tick(), PlayoutTick::StallStarted);
        assert!(buf.snapshot().stalled);
        for _ in 0..10 {
            assert_eq!(buf.tick(), PlayoutTick::Stalled);
        }
        let snap = buf.snapshot();
        assert_eq!(snap.stall_count, 1);
        assert_eq!(snap.consumed, 0);
        assert_eq!(snap.stalled_ticks, 11);
    }

    #[test]
    fn arrival_clears_stall_and_playout_resumes() {
        let mut buf = PlaybackBuffer::new(2);
        buf.tick();
        assert!(buf.record_arrival());
        assert!(!buf.snapshot().stalled);

        assert_eq!(buf.tick(), PlayoutTick::Played);
        assert_eq!(buf.tick(), PlayoutTick::Played);
        assert_eq!(buf.tick(), PlayoutTick::StallStarted);
        assert_eq!(buf.snapshot().stall_count, 2);
        assert_eq!(buf.snapshot().consumed, 2);
    }

    #[test]
    fn consumed_never_passes_produced() {
        let mut buf = PlaybackBuffer::new(3);
        buf.record_arrival();
        for i in 0..20 {
            if i % 7 == 0 {
                buf.record_arrival();
            }
            buf.tick();
            let snap = buf.snapshot();
            assert!(snap.consumed <= snap.produced);
        }
    }

    #[test]
    fn arrival_ahead_of_playout_does_not_stall() {
        let mut buf = PlaybackBuffer::new(30);
        assert!(!buf.record_arrival());
        for _ in 0..30 {
            assert_eq!(buf.tick(), PlayoutTick::Played);
        }
        assert_eq!(buf.snapshot().backlog(), 0);
        assert_eq!(buf.snapshot().stall_count, 0);
    }
}
