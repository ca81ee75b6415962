//! Event scheduling: the clock the engine hands continuations back to
//!
//! Nodes never call each other directly. Every continuation becomes an
//! event on a [`Scheduler`], and the engine dispatches events strictly in
//! non-decreasing time order, with ties broken by enqueue order.

use flowsim_types::{EntityId, ExecutorId, FlowId, SimTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// What happens when an event fires
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventKind {
    /// An executor arrives at a node
    Arrival { node: FlowId, executor: ExecutorId },
    /// A suspended executor continues past the node it was parked on
    Resume { node: FlowId, executor: ExecutorId },
    /// A generator produces its next batch of entities
    Generate {
        node: FlowId,
        source: EntityId,
        remaining: u32,
    },
}

/// An event with its firing time and enqueue sequence number
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub time: SimTime,
    pub sequence: u64,
    pub kind: EventKind,
}

/// The time-advancing queue the engine runs on
pub trait Scheduler {
    /// Enqueue an event at `time`
    fn schedule(&mut self, time: SimTime, kind: EventKind);

    /// Remove and return the earliest event
    fn pop_next(&mut self) -> Option<ScheduledEvent>;

    /// Time of the earliest event, if any
    fn peek_time(&self) -> Option<SimTime>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Reference queue ──────────────────────────────────────────────────

/// Binary-heap event queue ordered by time, then enqueue order
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<QueuedEvent>,
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for EventQueue {
    fn schedule(&mut self, time: SimTime, kind: EventKind) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(QueuedEvent(ScheduledEvent {
            time,
            sequence,
            kind,
        }));
    }

    fn pop_next(&mut self) -> Option<ScheduledEvent> {
        self.heap.pop().map(|queued| queued.0)
    }

    fn peek_time(&self) -> Option<SimTime> {
        self.heap.peek().map(|queued| queued.0.time)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

/// Heap entry. `BinaryHeap` is a max-heap, so the ordering is reversed:
/// the earliest time, then the lowest sequence, compares greatest.
#[derive(Debug)]
struct QueuedEvent(ScheduledEvent);

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .0
            .time
            .total_cmp(&self.0.time)
            .then_with(|| other.0.sequence.cmp(&self.0.sequence))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Eq for QueuedEvent {}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arrival(n: u32) -> EventKind {
        EventKind::Arrival {
            node: FlowId(n),
            executor: ExecutorId(0),
        }
    }

    #[test]
    fn test_orders_by_time() {
        let mut queue = EventQueue::new();
        queue.schedule(5.0, arrival(1));
        queue.schedule(1.0, arrival(2));
        queue.schedule(3.0, arrival(3));

        assert_eq!(queue.peek_time(), Some(1.0));
        let times: Vec<f64> = std::iter::from_fn(|| queue.pop_next()).map(|e| e.time).collect();
        assert_eq!(times, vec![1.0, 3.0, 5.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ties_keep_enqueue_order() {
        let mut queue = EventQueue::new();
        for n in 0..5 {
            queue.schedule(2.0, arrival(n));
        }
        let nodes: Vec<EventKind> = std::iter::from_fn(|| queue.pop_next()).map(|e| e.kind).collect();
        assert_eq!(nodes, (0..5).map(arrival).collect::<Vec<_>>());
    }

    proptest! {
        #[test]
        fn property_pop_order_is_time_then_sequence(
            times in prop::collection::vec(0u8..10, 1..50)
        ) {
            let mut queue = EventQueue::new();
            for (i, t) in times.iter().enumerate() {
                queue.schedule(*t as f64, arrival(i as u32));
            }
            prop_assert_eq!(queue.len(), times.len());

            let popped: Vec<ScheduledEvent> = std::iter::from_fn(|| queue.pop_next()).collect();
            for pair in popped.windows(2) {
                prop_assert!(pair[0].time <= pair[1].time);
                if pair[0].time == pair[1].time {
                    prop_assert!(pair[0].sequence < pair[1].sequence);
                }
            }
        }
    }
}
