use panocast_common::Priority;

use super::{Discipline, OrderKey, OrderedQueue, QueueEntry, ServicePhase};

/// Weighted fair queueing between the HIGH and LOW classes.
///
/// Self-clocked: the system virtual time is the finish tag of the entry last
/// served. An arriving entry of class `c` gets
///
/// ```text
/// finish = max(vtime, last_finish[c]) + max(cost, 1) / weight[c]
/// ```
///
/// and the entry with the smallest finish tag is served next. Tags only grow,
/// so a LOW entry is overtaken by a bounded number of HIGH entries.
pub struct WeightedFair {
    queue: OrderedQueue,
    weights: [f64; 2],
    last_finish: [f64; 2],
    vtime: f64,
}

impl WeightedFair {
    pub fn new(high_weight: f64, low_weight: f64) -> Self {
        Self {
            queue: OrderedQueue::default(),
            weights: [high_weight, low_weight],
            last_finish: [0.0; 2],
            vtime: 0.0,
        }
    }

    pub fn virtual_time(&self) -> f64 {
        self.vtime
    }

    fn weight(&self, priority: Priority) -> f64 {
        let w = self.weights[priority.class_index()];
        if w.is_finite() && w > 0.0 {
            w
        } else {
            1.0
        }
    }
}

impl Discipline for WeightedFair {
    fn name(&self) -> &'static str {
        "wfq"
    }

    fn enqueue(&mut self, mut entry: QueueEntry) {
        let class = entry.priority().class_index();
        let start = self.vtime.max(self.last_finish[class]);
        let finish = start + entry.cost.max(1) as f64 / self.weight(entry.priority());
        self.last_finish[class] = finish;
        entry.virtual_finish = Some(finish);
        self.queue.push(OrderKey::of(&entry, finish), entry);
    }

    fn next_to_serve(&mut self) -> Option<QueueEntry> {
        let entry = self.queue.pop()?;
        if let Some(finish) = entry.virtual_finish {
            self.vtime = self.vtime.max(finish);
        }
        Some(entry)
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
