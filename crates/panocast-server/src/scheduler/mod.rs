//! # Queue Discipline Scheduler
//!
//! Holds pending tile requests and decides which one is served next.
//!
//! Three interchangeable disciplines implement [`Discipline`]:
//!
//! - [`Fifo`] — one queue in arrival order, priority ignored
//! - [`StrictPriority`] — HIGH drained completely before any LOW
//! - [`WeightedFair`] — self-clocked fair queueing over the two classes
//!
//! All of them break ties the same way: earliest arrival first, then
//! `(segment, tile)` ascending, then enqueue order.

mod fifo;
mod strict;
mod wfq;

pub use fifo::Fifo;
pub use strict::StrictPriority;
pub use wfq::WeightedFair;

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use panocast_common::{Priority, QueueDiscipline, SchedulerConfig, TileRequest};

// ─── Entries ─────────────────────────────────────────────────────────────────

/// A pending request plus the bookkeeping the disciplines order by.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub request: TileRequest,
    /// Microseconds since session start when the request was read.
    pub arrival_us: u64,
    /// Service cost in bytes (the tile's stored size).
    pub cost: u64,
    /// Virtual finish time, assigned by [`WeightedFair`] on enqueue.
    pub virtual_finish: Option<f64>,
    seq: u64,
}

impl QueueEntry {
    pub fn new(request: TileRequest, arrival_us: u64, cost: u64, seq: u64) -> Self {
        Self {
            request,
            arrival_us,
            cost,
            virtual_finish: None,
            seq,
        }
    }

    pub fn priority(&self) -> Priority {
        self.request.priority
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Serving order: `primary` (virtual finish, or 0), then arrival, then
/// `(segment, tile)`, then enqueue sequence.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OrderKey {
    primary: f64,
    arrival_us: u64,
    segment: u32,
    tile: u16,
    seq: u64,
}

impl OrderKey {
    pub(crate) fn of(entry: &QueueEntry, primary: f64) -> Self {
        Self {
            primary,
            arrival_us: entry.arrival_us,
            segment: entry.request.segment,
            tile: entry.request.tile,
            seq: entry.seq,
        }
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.primary
            .total_cmp(&other.primary)
            .then(self.arrival_us.cmp(&other.arrival_us))
            .then(self.segment.cmp(&other.segment))
            .then(self.tile.cmp(&other.tile))
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for OrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderKey {}

struct Slot {
    key: OrderKey,
    entry: QueueEntry,
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Slot {}

/// Min-heap of entries by [`OrderKey`].
#[derive(Default)]
pub(crate) struct OrderedQueue {
    heap: BinaryHeap<Reverse<Slot>>,
}

impl OrderedQueue {
    pub(crate) fn push(&mut self, key: OrderKey, entry: QueueEntry) {
        self.heap.push(Reverse(Slot { key, entry }));
    }

    pub(crate) fn pop(&mut self) -> Option<QueueEntry> {
        self.heap.pop().map(|Reverse(slot)| slot.entry)
    }

    pub(crate) fn peek(&self) -> Option<&QueueEntry> {
        self.heap.peek().map(|Reverse(slot)| &slot.entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub(crate) fn clear(&mut self) -> usize {
        let n = self.heap.len();
        self.heap.clear();
        n
    }
}

// ─── Discipline trait ────────────────────────────────────────────────────────

/// What the queue will do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    Idle,
    /// The next entry served is HIGH priority.
    ServingHigh,
    /// No HIGH entry is ahead; LOW entries are being drained.
    DrainingLow,
}

impl ServicePhase {
    pub(crate) fn of_next(next: Option<&QueueEntry>) -> Self {
        match next.map(QueueEntry::priority) {
            None => ServicePhase::Idle,
            Some(Priority::High) => ServicePhase::ServingHigh,
            Some(Priority::Low) => ServicePhase::DrainingLow,
        }
    }
}

pub trait Discipline: Send {
    fn name(&self) -> &'static str;

    fn enqueue(&mut self, entry: QueueEntry);

    /// Removes and returns the entry to serve next.
    fn next_to_serve(&mut self) -> Option<QueueEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn phase(&self) -> ServicePhase;

    /// Drops every queued entry, returning how many were dropped.
    fn clear(&mut self) -> usize;
}

pub fn build(config: &SchedulerConfig) -> Box<dyn Discipline> {
    match config.discipline {
        QueueDiscipline::Fifo => Box::new(Fifo::new()),
        QueueDiscipline::StrictPriority => Box::new(StrictPriority::new()),
        QueueDiscipline::WeightedFair => {
            Box::new(WeightedFair::new(config.high_weight, config.low_weight))
        }
    }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub enqueued: u64,
    pub served_high: u64,
    pub served_low: u64,
    pub discarded: u64,
}

impl SchedulerStats {
    pub fn served(&self) -> u64 {
        self.served_high + self.served_low
    }
}

/// Single-owner front end for a [`Discipline`]: stamps enqueue order and
/// keeps service counters.
pub struct Scheduler {
    discipline: Box<dyn Discipline>,
    next_seq: u64,
    stats: SchedulerStats,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self::with_discipline(build(config))
    }

    pub fn with_discipline(discipline: Box<dyn Discipline>) -> Self {
        Self {
            discipline,
            next_seq: 0,
            stats: SchedulerStats::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.discipline.name()
    }

    pub fn enqueue(&mut self, request: TileRequest, arrival_us: u64, cost: u64) {
        let entry = QueueEntry::new(request, arrival_us, cost, self.next_seq);
        self.next_seq += 1;
        self.stats.enqueued += 1;
        self.discipline.enqueue(entry);
    }

    pub fn next_to_serve(&mut self) -> Option<QueueEntry> {
        let entry = self.discipline.next_to_serve()?;
        match entry.priority() {
            Priority::High => self.stats.served_high += 1,
            Priority::Low => self.stats.served_low += 1,
        }
        Some(entry)
    }

    /// Drops everything still queued.
    pub fn discard_all(&mut self) -> usize {
        let n = self.discipline.clear();
        self.stats.discarded += n as u64;
        n
    }

    pub fn len(&self) -> usize {
        self.discipline.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discipline.is_empty()
    }

    pub fn phase(&self) -> ServicePhase {
        self.discipline.phase()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }
}
