//! Deadline queue for "wait N seconds, then do X"
//!
//! Owners call [`TimerQueue::pop_due`] once per tick. Cancelling is idempotent
//! and a cancelled timer never fires.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

pub type TimerId = u64;

#[derive(Debug)]
struct Deadline {
    at: f64,
    id: TimerId,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Deadline {}

impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Deadline {
    // Reversed so the max-heap yields the earliest deadline; ties fire in scheduling order
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .at
            .total_cmp(&self.at)
            .then_with(|| other.id.cmp(&self.id))
    }
}

#[derive(Debug)]
pub struct TimerQueue<T> {
    heap: BinaryHeap<Deadline>,
    actions: HashMap<TimerId, T>,
    next_id: TimerId,
}

impl<T> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            actions: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn schedule(&mut self, deadline: f64, action: T) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Deadline { at: deadline, id });
        self.actions.insert(id, action);
        id
    }

    /// Returns the action if the timer was still pending
    pub fn cancel(&mut self, id: TimerId) -> Option<T> {
        self.actions.remove(&id)
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.actions.contains_key(&id)
    }

    /// Removes and returns every action whose deadline is at or before `now`
    pub fn pop_due(&mut self, now: f64) -> Vec<T> {
        let mut due = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.at > now {
                break;
            }
            if let Some(deadline) = self.heap.pop() {
                if let Some(action) = self.actions.remove(&deadline.id) {
                    due.push(action);
                }
            }
        }
        due
    }

    pub fn next_deadline(&mut self) -> Option<f64> {
        // Skip heap entries whose action was cancelled
        while let Some(top) = self.heap.peek() {
            if self.actions.contains_key(&top.id) {
                return Some(top.at);
            }
            self.heap.pop();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.actions.clear();
    }
}

impl<T> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut timers = TimerQueue::new();
        timers.schedule(3.0, "c");
        timers.schedule(1.0, "a");
        timers.schedule(2.0, "b");

        assert!(timers.pop_due(0.5).is_empty());
        assert_eq!(timers.pop_due(2.5), vec!["a", "b"]);
        assert_eq!(timers.pop_due(10.0), vec!["c"]);
        assert!(timers.is_empty());
    }

    #[test]
    fn test_equal_deadlines_fire_in_schedule_order() {
        let mut timers = TimerQueue::new();
        timers.schedule(1.0, 1);
        timers.schedule(1.0, 2);
        timers.schedule(1.0, 3);
        assert_eq!(timers.pop_due(1.0), vec![1, 2, 3]);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut timers = TimerQueue::new();
        let id = timers.schedule(1.0, "respawn");

        assert_eq!(timers.cancel(id), Some("respawn"));
        assert_eq!(timers.cancel(id), None);
        assert!(!timers.is_pending(id));
        assert!(timers.pop_due(5.0).is_empty());
    }

    #[test]
    fn test_next_deadline_skips_cancelled() {
        let mut timers = TimerQueue::new();
        let early = timers.schedule(1.0, ());
        timers.schedule(4.0, ());
        timers.cancel(early);

        assert_eq!(timers.next_deadline(), Some(4.0));
        timers.clear();
        assert_eq!(timers.next_deadline(), None);
    }
}
