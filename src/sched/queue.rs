//! Per-CPU ready queue.
//!
//! One FIFO per priority level plus a bitmap of non-empty levels, so picking
//! the most urgent thread is a bit scan and enqueueing is O(1).

use crate::config::PRIO_LEVELS;
use crate::thread::ThreadId;
use alloc::collections::VecDeque;
use alloc::vec::Vec;

const MAP_WORDS: usize = (PRIO_LEVELS + 63) / 64;

/// Multi-level ready queue.
pub struct ReadyQueue {
    levels: Vec<VecDeque<ThreadId>>,
    map: [u64; MAP_WORDS],
    count: usize,
}

impl ReadyQueue {
    pub fn new() -> Self {
        let mut levels = Vec::with_capacity(PRIO_LEVELS);
        levels.resize_with(PRIO_LEVELS, VecDeque::new);
        Self {
            levels,
            map: [0; MAP_WORDS],
            count: 0,
        }
    }

    /// Append at the tail of `prio`'s level.
    pub fn enqueue(&mut self, thread: ThreadId, prio: u8) {
        self.levels[prio as usize].push_back(thread);
        self.mark(prio);
        self.count += 1;
    }

    /// Insert at the head of `prio`'s level: a preempted thread keeps its turn.
    pub fn requeue(&mut self, thread: ThreadId, prio: u8) {
        self.levels[prio as usize].push_front(thread);
        self.mark(prio);
        self.count += 1;
    }

    /// Remove `thread` from `prio`'s level. Returns false if it was not there.
    pub fn remove(&mut self, thread: ThreadId, prio: u8) -> bool {
        let level = &mut self.levels[prio as usize];
        match level.iter().position(|&t| t == thread) {
            Some(pos) => {
                level.remove(pos);
                if level.is_empty() {
                    self.unmark(prio);
                }
                self.count -= 1;
                true
            }
            None => false,
        }
    }

    /// Highest non-empty priority level.
    pub fn top_priority(&self) -> Option<u8> {
        for word in (0..MAP_WORDS).rev() {
            let bits = self.map[word];
            if bits != 0 {
                let bit = 63 - bits.leading_zeros() as usize;
                return Some((word * 64 + bit) as u8);
            }
        }
        None
    }

    /// Head of the most urgent level, without dequeuing it.
    pub fn peek(&self) -> Option<(ThreadId, u8)> {
        let prio = self.top_priority()?;
        self.levels[prio as usize].front().map(|&t| (t, prio))
    }

    /// Dequeue the head of the most urgent level.
    pub fn pop(&mut self) -> Option<(ThreadId, u8)> {
        let prio = self.top_priority()?;
        let level = &mut self.levels[prio as usize];
        let thread = level.pop_front()?;
        if level.is_empty() {
            self.unmark(prio);
        }
        self.count -= 1;
        Some((thread, prio))
    }

    /// Threads queued at exactly `prio`.
    pub fn level_len(&self, prio: u8) -> usize {
        self.levels[prio as usize].len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Queue contents, most urgent first.
    pub fn iter(&self) -> impl Iterator<Item = (ThreadId, u8)> + '_ {
        self.levels
            .iter()
            .enumerate()
            .rev()
            .flat_map(|(prio, level)| level.iter().map(move |&t| (t, prio as u8)))
    }

    fn mark(&mut self, prio: u8) {
        let prio = prio as usize;
        self.map[prio / 64] |= 1 << (prio % 64);
    }

    fn unmark(&mut self, prio: u8) {
        let prio = prio as usize;
        self.map[prio / 64] &= !(1 << (prio % 64));
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
