use crate::thread::ThreadId;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// Sleepers of a synchronization object.
///
/// Priority-ordered queues keep the most urgent sleeper first and stay FIFO
/// among equal priorities; FIFO queues keep arrival order only.
#[derive(Debug, Clone)]
pub struct WaitQueue {
    entries: VecDeque<(ThreadId, u8)>,
    by_priority: bool,
}

impl WaitQueue {
    pub fn new(by_priority: bool) -> Self {
        Self {
            entries: VecDeque::new(),
            by_priority,
        }
    }

    pub fn insert(&mut self, thread: ThreadId, prio: u8) {
        if self.by_priority {
            let pos = self
                .entries
                .iter()
                .position(|&(_, queued)| queued < prio)
                .unwrap_or(self.entries.len());
            self.entries.insert(pos, (thread, prio));
        } else {
            self.entries.push_back((thread, prio));
        }
    }

    pub fn remove(&mut self, thread: ThreadId) -> bool {
        match self.entries.iter().position(|&(t, _)| t == thread) {
            Some(pos) => {
                self.entries.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Update the priority a sleeper is queued with. A priority-ordered
    /// queue moves it behind the sleepers of its new level.
    pub fn reposition(&mut self, thread: ThreadId, prio: u8) {
        if self.by_priority {
            if self.remove(thread) {
                self.insert(thread, prio);
            }
        } else if let Some(entry) = self.entries.iter_mut().find(|(t, _)| *t == thread) {
            entry.1 = prio;
        }
    }

    pub fn pop_front(&mut self) -> Option<(ThreadId, u8)> {
        self.entries.pop_front()
    }

    pub fn front(&self) -> Option<(ThreadId, u8)> {
        self.entries.front().copied()
    }

    /// Highest priority among sleepers.
    pub fn top_priority(&self) -> Option<u8> {
        if self.by_priority {
            self.front().map(|(_, prio)| prio)
        } else {
            self.entries.iter().map(|&(_, prio)| prio).max()
        }
    }

    pub fn drain(&mut self) -> Vec<ThreadId> {
        self.entries.drain(..).map(|(t, _)| t).collect()
    }

    pub fn contains(&self, thread: ThreadId) -> bool {
        self.entries.iter().any(|&(t, _)| t == thread)
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.entries.iter().map(|&(t, _)| t).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    fn ids(n: usize) -> Vec<ThreadId> {
        let mut arena: Arena<ThreadId, ()> = Arena::with_limit(n);
        (0..n).map(|_| arena.insert(()).unwrap()).collect()
    }

    #[test]
    fn test_priority_order_is_stable() {
        let t = ids(4);
        let mut queue = WaitQueue::new(true);
        queue.insert(t[0], 5);
        queue.insert(t[1], 9);
        queue.insert(t[2], 5);
        queue.insert(t[3], 9);
        assert_eq!(queue.threads(), alloc::vec![t[1], t[3], t[0], t[2]]);
        assert_eq!(queue.top_priority(), Some(9));

        queue.reposition(t[2], 9);
        assert_eq!(queue.threads(), alloc::vec![t[1], t[3], t[2], t[0]]);
    }

    #[test]
    fn test_fifo_ignores_priority() {
        let t = ids(3);
        let mut queue = WaitQueue::new(false);
        queue.insert(t[0], 1);
        queue.insert(t[1], 200);
        queue.insert(t[2], 50);
        assert_eq!(queue.front(), Some((t[0], 1)));
        assert_eq!(queue.top_priority(), Some(200));
        assert!(queue.remove(t[1]));
        assert_eq!(queue.top_priority(), Some(50));
        assert_eq!(queue.drain(), alloc::vec![t[0], t[2]]);
        assert!(queue.is_empty());
    }
}
