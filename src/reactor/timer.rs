//! Timer wheel for the reactor (spec §4.1): "an ordered multimap keyed by
//! absolute nanoseconds; on each tick, all `<= now` fire in key order;
//! cancellation is O(log n) by id."

use std::collections::BTreeMap;

pub type TimerId = u64;

pub struct TimerWheel {
    /// (at_ns, id) -> () lets multiple timers share a deadline while
    /// keeping iteration ordered by deadline then id.
    entries: BTreeMap<(u64, TimerId), ()>,
    ids_to_deadline: std::collections::HashMap<TimerId, u64>,
    next_id: TimerId,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            ids_to_deadline: std::collections::HashMap::new(),
            next_id: 1,
        }
    }

    pub fn add_timer(&mut self, at_ns: u64) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert((at_ns, id), ());
        self.ids_to_deadline.insert(id, at_ns);
        id
    }

    pub fn cancel_timer(&mut self, id: TimerId) -> bool {
        if let Some(at_ns) = self.ids_to_deadline.remove(&id) {
            self.entries.remove(&(at_ns, id));
            true
        } else {
            false
        }
    }

    /// Pops every timer due at or before `now_ns`, in deadline-then-id
    /// order.
    pub fn drain_due(&mut self, now_ns: u64) -> Vec<TimerId> {
        let due: Vec<(u64, TimerId)> = self
            .entries
            .range(..=(now_ns, u64::MAX))
            .map(|(k, _)| *k)
            .collect();
        let mut fired = Vec::with_capacity(due.len());
        for key in due {
            self.entries.remove(&key);
            self.ids_to_deadline.remove(&key.1);
            fired.push(key.1);
        }
        fired
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut wheel = TimerWheel::new();
        let a = wheel.add_timer(100);
        let b = wheel.add_timer(50);
        let c = wheel.add_timer(100);

        let fired = wheel.drain_due(100);
        assert_eq!(fired, vec![b, a, c]);
    }

    #[test]
    fn cancel_before_fire() {
        let mut wheel = TimerWheel::new();
        let a = wheel.add_timer(10);
        assert!(wheel.cancel_timer(a));
        assert!(wheel.drain_due(100).is_empty());
    }
}
