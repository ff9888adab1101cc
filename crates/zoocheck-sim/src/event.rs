//! Time-ordered event queue of the event-driven driver.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

/// Sequence number of a scheduled event. Breaks timestamp ties FIFO.
pub type EventId = u64;

/// Converts a duration to whole nanoseconds, saturating.
pub fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// What happens when an event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Issue the request of phase `index`, if any.
    ExecutePhase { index: usize },

    /// Crash `server` if it runs, start it otherwise.
    StartOrStop { server: usize },
}

/// A scheduled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    /// Offset from the start of the run.
    pub time_ns: u64,
    pub kind: EventKind,
}

impl Ord for Event {
    // Reversed so the max-heap pops the earliest event first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time_ns
            .cmp(&self.time_ns)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Priority queue of events ordered by time, then by scheduling order.
#[derive(Debug, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Event>,
    next_id: EventId,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `kind` at `time_ns`.
    pub fn schedule(&mut self, time_ns: u64, kind: EventKind) -> EventId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Event { id, time_ns, kind });
        id
    }

    /// Removes and returns the earliest event.
    pub fn pop(&mut self) -> Option<Event> {
        self.heap.pop()
    }

    /// Time of the earliest event.
    pub fn peek_time(&self) -> Option<u64> {
        self.heap.peek().map(|event| event.time_ns)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_time_order() {
        let mut queue = EventQueue::new();
        queue.schedule(300, EventKind::StartOrStop { server: 0 });
        queue.schedule(100, EventKind::ExecutePhase { index: 0 });
        queue.schedule(200, EventKind::StartOrStop { server: 1 });

        assert_eq!(queue.peek_time(), Some(100));
        let times: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|e| e.time_ns).collect();
        assert_eq!(times, vec![100, 200, 300]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_ties_are_fifo() {
        let mut queue = EventQueue::new();
        queue.schedule(50, EventKind::StartOrStop { server: 2 });
        queue.schedule(50, EventKind::ExecutePhase { index: 1 });
        queue.schedule(50, EventKind::StartOrStop { server: 0 });
        assert_eq!(queue.len(), 3);

        let kinds: Vec<EventKind> = std::iter::from_fn(|| queue.pop()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::StartOrStop { server: 2 },
                EventKind::ExecutePhase { index: 1 },
                EventKind::StartOrStop { server: 0 },
            ]
        );
    }

    #[test]
    fn test_duration_ns() {
        assert_eq!(duration_ns(Duration::from_millis(5)), 5_000_000);
        assert_eq!(duration_ns(Duration::MAX), u64::MAX);
    }
}
