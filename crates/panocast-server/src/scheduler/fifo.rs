use super::{Discipline, OrderKey, OrderedQueue, QueueEntry, ServicePhase};

/// Single queue served in arrival order; priority is ignored.
#[derive(Default)]
pub struct Fifo {
    queue: OrderedQueue,
}

impl Fifo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Discipline for Fifo {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn enqueue(&mut self, entry: QueueEntry) {
        self.queue.push(OrderKey::of(&entry, 0.0), entry);
    }

    fn next_to_serve(&mut self) -> Option<QueueEntry> {
        self.queue.pop()
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn phase(&self) -> ServicePhase {
        ServicePhase::of_next(self.queue.peek())
    }

    fn clear(&mut self) -> usize {
        self.queue.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;
    use panocast_common::Priority;

    #[test]
    fn serves_in_arrival_order_regardless_of_priority() {
        let mut fifo = Fifo::new();
        fifo.enqueue(entry(0, 10, req(1, 5, Priority::Low)));
        fifo.enqueue(entry(1, 20, req(1, 1, Priority::High)));
        fifo.enqueue(entry(2, 30, req(1, 3, Priority::Low)));
        assert_eq!(fifo.phase(), ServicePhase::DrainingLow);
        assert_eq!(drain(&mut fifo), vec![(1, 5), (1, 1), (1, 3)]);
        assert!(fifo.is_empty());
    }

    #[test]
    fn equal_arrival_orders_by_segment_then_tile() {
        let mut fifo = Fifo::new();
        fifo.enqueue(entry(0, 7, req(2, 1, Priority::High)));
        fifo.enqueue(entry(1, 7, req(1, 9, Priority::High)));
        fifo.enqueue(entry(2, 7, req(1, 2, Priority::Low)));
        assert_eq!(drain(&mut fifo), vec![(1, 2), (1, 9), (2, 1)]);
    }
}
