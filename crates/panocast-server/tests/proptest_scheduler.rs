//! Property-based tests for the queue disciplines.
//!
//! Any interleaving of enqueues and services must hand out every request
//! exactly once, under every discipline.

use std::collections::HashMap;

use panocast_common::{Priority, QueueDiscipline, SchedulerConfig, TileRequest};
use panocast_server::{Scheduler, ServicePhase};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Enqueue {
        segment: u32,
        tile: u16,
        high: bool,
        cost: u64,
    },
    Serve,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1u32..4, 1u16..201, any::<bool>(), 0u64..50_000).prop_map(
            |(segment, tile, high, cost)| Op::Enqueue { segment, tile, high, cost }
        ),
        2 => Just(Op::Serve),
    ]
}

fn discipline() -> impl Strategy<Value = QueueDiscipline> {
    prop_oneof![
        Just(QueueDiscipline::Fifo),
        Just(QueueDiscipline::StrictPriority),
        Just(QueueDiscipline::WeightedFair),
    ]
}

proptest! {
    #[test]
    fn every_request_served_exactly_once(
        discipline in discipline(),
        ops in prop::collection::vec(op(), 0..400),
    ) {
        let mut sched = Scheduler::new(&SchedulerConfig {
            discipline,
            ..SchedulerConfig::default()
        });

        // Duplicate (segment, tile) pairs are legal, so count by enqueue seq.
        let mut outstanding: HashMap<u64, TileRequest> = HashMap::new();
        let mut next_seq = 0u64;
        let mut clock = 0u64;

        let serve_one = |sched: &mut Scheduler, outstanding: &mut HashMap<u64, TileRequest>| {
            let entry = sched.next_to_serve();
            if let Some(entry) = entry {
                let expected = outstanding.remove(&entry.seq());
                assert_eq!(expected, Some(entry.request), "served twice or never enqueued");
            } else {
                assert!(outstanding.is_empty());
            }
        };

        for op in ops {
            clock += 1;
            match op {
                Op::Enqueue { segment, tile, high, cost } => {
                    let priority = if high { Priority::High } else { Priority::Low };
                    let request = TileRequest::new(segment, tile, priority, 3000);
                    sched.enqueue(request, clock, cost);
                    outstanding.insert(next_seq, request);
                    next_seq += 1;
                }
                Op::Serve => serve_one(&mut sched, &mut outstanding),
            }
            prop_assert_eq!(sched.len(), outstanding.len());
        }

        while !sched.is_empty() {
            serve_one(&mut sched, &mut outstanding);
        }
        prop_assert!(outstanding.is_empty());
        prop_assert_eq!(sched.phase(), ServicePhase::Idle);
        prop_assert_eq!(sched.stats().served(), next_seq);
    }

    #[test]
    fn strict_priority_never_serves_low_while_high_waits(
        ops in prop::collection::vec(op(), 0..300),
    ) {
        let mut sched = Scheduler::new(&SchedulerConfig {
            discipline: QueueDiscipline::StrictPriority,
            ..SchedulerConfig::default()
        });
        let mut high_waiting = 0usize;
        for (clock, op) in ops.into_iter().enumerate() {
            match op {
                Op::Enqueue { segment, tile, high, cost } => {
                    let priority = if high { Priority::High } else { Priority::Low };
                    if high {
                        high_waiting += 1;
                    }
                    sched.enqueue(
                        TileRequest::new(segment, tile, priority, 3000),
                        clock as u64,
                        cost,
                    );
                }
                Op::Serve => {
                    if let Some(entry) = sched.next_to_serve() {
                        if high_waiting > 0 {
                            prop_assert_eq!(entry.request.priority, Priority::High);
                            high_waiting -= 1;
                        } else {
                            prop_assert_eq!(entry.request.priority, Priority::Low);
                        }
                    }
                }
            }
        }
    }
}
