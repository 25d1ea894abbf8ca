//! Timer queues for the two operating modes.
//!
//! Periodic mode hashes timers into a circular array of slots by trigger
//! date; each tick inspects exactly one slot. Timers due on a later revolution
//! simply stay where they are. Aperiodic mode keeps a single list ordered by
//! date (an ordered map keyed by date plus an arrival sequence, so equal dates
//! stay FIFO).

use super::TimerId;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;

/// Where a queued timer sits, kept in the timer so removal is direct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKey {
    Slot(usize),
    Ordered(u64, u64),
}

/// Timer queue, one per pod.
pub enum TimerWheel {
    Periodic {
        slots: Vec<VecDeque<(u64, TimerId)>>,
    },
    Aperiodic {
        list: BTreeMap<(u64, u64), TimerId>,
        seq: u64,
    },
}

impl TimerWheel {
    pub fn periodic(wheel_size: usize) -> Self {
        let mut slots = Vec::with_capacity(wheel_size.max(1));
        slots.resize_with(wheel_size.max(1), VecDeque::new);
        TimerWheel::Periodic { slots }
    }

    pub fn aperiodic() -> Self {
        TimerWheel::Aperiodic {
            list: BTreeMap::new(),
            seq: 0,
        }
    }

    pub fn insert(&mut self, timer: TimerId, date: u64) -> QueueKey {
        match self {
            TimerWheel::Periodic { slots } => {
                let slot = (date % slots.len() as u64) as usize;
                slots[slot].push_back((date, timer));
                QueueKey::Slot(slot)
            }
            TimerWheel::Aperiodic { list, seq } => {
                *seq += 1;
                list.insert((date, *seq), timer);
                QueueKey::Ordered(date, *seq)
            }
        }
    }

    pub fn remove(&mut self, timer: TimerId, key: QueueKey) -> bool {
        match (self, key) {
            (TimerWheel::Periodic { slots }, QueueKey::Slot(slot)) => {
                let bucket = &mut slots[slot];
                match bucket.iter().position(|&(_, t)| t == timer) {
                    Some(pos) => {
                        bucket.remove(pos);
                        true
                    }
                    None => false,
                }
            }
            (TimerWheel::Aperiodic { list, .. }, QueueKey::Ordered(date, seq)) => {
                list.remove(&(date, seq)).is_some()
            }
            _ => false,
        }
    }

    /// Earliest trigger date. Only meaningful for the ordered list.
    pub fn head(&self) -> Option<(u64, TimerId)> {
        match self {
            TimerWheel::Periodic { .. } => None,
            TimerWheel::Aperiodic { list, .. } => {
                list.iter().next().map(|(&(date, _), &timer)| (date, timer))
            }
        }
    }

    /// Unlink every timer due at or before `limit`.
    ///
    /// Periodic mode only looks at the slot `limit` hashes to; aperiodic mode
    /// walks the ordered list from its head. Returned in firing order.
    pub fn take_due(&mut self, limit: u64) -> Vec<TimerId> {
        let mut due = Vec::new();
        match self {
            TimerWheel::Periodic { slots } => {
                let slot = (limit % slots.len() as u64) as usize;
                slots[slot].retain(|&(date, timer)| {
                    if date <= limit {
                        due.push(timer);
                        false
                    } else {
                        true
                    }
                });
            }
            TimerWheel::Aperiodic { list, .. } => {
                while let Some(entry) = list.first_entry() {
                    if entry.key().0 > limit {
                        break;
                    }
                    due.push(entry.remove());
                }
            }
        }
        due
    }

    pub fn len(&self) -> usize {
        match self {
            TimerWheel::Periodic { slots } => slots.iter().map(VecDeque::len).sum(),
            TimerWheel::Aperiodic { list, .. } => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
