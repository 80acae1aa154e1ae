use panocast_common::Priority;

use super::{Discipline, OrderKey, OrderedQueue, QueueEntry, ServicePhase};

/// Two class queues; LOW is served only while HIGH is empty.
///
/// Continuous HIGH arrivals starve LOW indefinitely. Once HIGH input stops,
/// the HIGH queue empties and the discipline enters
/// [`ServicePhase::DrainingLow`] until LOW is empty as well.
#[derive(Default)]
pub struct StrictPriority {
    high: OrderedQueue,
    low: OrderedQueue,
}

impl StrictPriority {
    pub fn new() -> Self {
        Self::default()
    }

    fn class(&mut self, priority: Priority) -> &mut OrderedQueue {
        match priority {
            Priority::High => &mut self.high,
            Priority::Low => &mut self.low,
        }
    }
}

impl Discipline for StrictPriority {
    fn name(&self) -> &'static str {
        "sp"
    }

    fn enqueue(&mut self, entry: QueueEntry) {
        let key = OrderKey::of(&entry, 0.0);
        self.class(entry.priority()).push(key, entry);
    }

    fn next_to_serve(&mut self) -> Option<QueueEntry> {
        self.high.pop().or_else(|| self.low.pop())
    }

    fn len(&self) -> usize {
        self.high.len() + self.low.len()
    }

    fn phase(&self) -> ServicePhase {
        if !self.high.is_empty() {
            ServicePhase::ServingHigh
        } else if !self.low.is_empty() {
            ServicePhase::DrainingLow
        } else {
            ServicePhase::Idle
        }
    }

    fn clear(&mut self) -> usize {
        self.high.clear() + self.low.clear()
    }
}
