//! Thread objects.
//!
//! A thread is the schedulable unit of the nucleus. Its lifecycle is
//!
//! ```text
//! Dormant -> Ready -> Running <-> Blocked{SUSPENDED | PENDING | DELAYED | RELAXED} -> Zombie
//! ```
//!
//! Block reasons can pile up (a suspended thread may also be pending on a
//! resource); the thread only becomes ready again once every reason has been
//! cleared. Modifiers that do not affect runnability (boosted, scheduler
//! locked, round-robin, FPU, killed) are kept apart in [`ThreadFlags`].

use crate::arch::CpuId;
use crate::arena::handle_type;
use crate::errors::{NucleusResult, WaitError};
use crate::synch::SynchId;
use crate::timer::TimerId;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;

pub mod builder;

pub use builder::ThreadBuilder;

handle_type!(
    /// Handle naming a thread.
    ThreadId
);

/// Thread body. Receives the cookie given to `thread_start`.
pub type ThreadEntry = fn(usize);

bitflags! {
    /// Reasons a thread is not runnable.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockCondition: u8 {
        /// Explicitly suspended
        const SUSPENDED = 1 << 0;
        /// Waiting on a synchronization object
        const PENDING = 1 << 1;
        /// Waiting for a timer (timeout, delay or periodic release)
        const DELAYED = 1 << 2;
        /// Running under the host domain, invisible to the nucleus
        const RELAXED = 1 << 3;
    }
}

bitflags! {
    /// Modifiers orthogonal to the thread state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ThreadFlags: u8 {
        /// Current priority raised by priority inheritance
        const BOOSTED = 1 << 0;
        /// Holds the scheduler lock
        const LOCKED = 1 << 1;
        /// Time-sliced among equal priorities
        const ROUND_ROBIN = 1 << 2;
        /// Uses the FPU
        const FPU = 1 << 3;
        /// Deletion requested, teardown pending
        const KILLED = 1 << 4;
    }
}

/// Thread state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created, never started
    Dormant,
    /// Queued for a CPU
    Ready,
    /// Owns its CPU
    Running,
    /// Waiting for every listed reason to clear
    Blocked(BlockCondition),
    /// Deleted; teardown pending or done
    Zombie,
}

impl ThreadState {
    pub fn is_runnable(self) -> bool {
        matches!(self, ThreadState::Ready | ThreadState::Running)
    }

    pub fn block_condition(self) -> BlockCondition {
        match self {
            ThreadState::Blocked(cond) => cond,
            _ => BlockCondition::empty(),
        }
    }
}

/// How the last wait of a thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Woken by the resource it waited for
    Normal,
    /// The timeout fired first
    TimedOut,
    /// The object went away while waiting
    Removed,
    /// Forcibly unblocked
    Broken,
}

impl WakeReason {
    /// Map the outcome to a result: only a normal wakeup is a success.
    pub fn into_result(self) -> NucleusResult<()> {
        match self {
            WakeReason::Normal => Ok(()),
            WakeReason::TimedOut => Err(WaitError::TimedOut.into()),
            WakeReason::Removed => Err(WaitError::Removed.into()),
            WakeReason::Broken => Err(WaitError::Broken.into()),
        }
    }
}

/// Bound on a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Wait until explicitly woken
    Infinite,
    /// Give up after this many timer units
    After(u64),
}

/// Outcome of [`Pod::wait_period`](crate::sched::Pod::wait_period).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodWait {
    /// The thread blocked until its next release point
    Blocked,
    /// Release points were missed; the thread did not block
    Overrun(u64),
}

/// Thread control block.
pub struct Thread {
    pub(crate) name: String,
    pub(crate) base_prio: u8,
    pub(crate) cur_prio: u8,
    pub(crate) state: ThreadState,
    pub(crate) flags: ThreadFlags,
    pub(crate) cpu: CpuId,
    /// Object the thread is pending on
    pub(crate) wchan: Option<SynchId>,
    /// Owned priority-inheritance objects whose waiters outrank `base_prio`
    pub(crate) claims: Vec<SynchId>,
    /// Scheduler lock nesting
    pub(crate) lock_depth: u32,
    pub(crate) rr_quantum: u64,
    pub(crate) rr_credit: u64,
    pub(crate) entry: Option<ThreadEntry>,
    pub(crate) cookie: usize,
    pub(crate) start_suspended: bool,
    /// Resource timer: timeouts and delays
    pub(crate) rtimer: TimerId,
    /// Periodic release timer
    pub(crate) ptimer: TimerId,
    pub(crate) wake_reason: Option<WakeReason>,
    pub(crate) period: Option<u64>,
    pub(crate) overruns: u64,
    /// Waiting in `wait_period`
    pub(crate) awaiting_release: bool,
}

impl Thread {
    pub(crate) fn new(builder: ThreadBuilder, rtimer: TimerId, ptimer: TimerId) -> Self {
        let mut flags = ThreadFlags::empty();
        if builder.fpu {
            flags |= ThreadFlags::FPU;
        }
        if builder.rr_quantum.is_some() {
            flags |= ThreadFlags::ROUND_ROBIN;
        }
        let quantum = builder.rr_quantum.unwrap_or(0);

        Self {
            name: builder.name.unwrap_or_default(),
            base_prio: builder.priority,
            cur_prio: builder.priority,
            state: ThreadState::Dormant,
            flags,
            cpu: builder.cpu,
            wchan: None,
            claims: Vec::new(),
            lock_depth: 0,
            rr_quantum: quantum,
            rr_credit: quantum,
            entry: None,
            cookie: 0,
            start_suspended: builder.suspended,
            rtimer,
            ptimer,
            wake_reason: None,
            period: None,
            overruns: 0,
            awaiting_release: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_priority(&self) -> u8 {
        self.base_prio
    }

    pub fn priority(&self) -> u8 {
        self.cur_prio
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn flags(&self) -> ThreadFlags {
        self.flags
    }

    pub fn cpu(&self) -> CpuId {
        self.cpu
    }

    pub fn wait_channel(&self) -> Option<SynchId> {
        self.wchan
    }

    pub fn entry(&self) -> Option<(ThreadEntry, usize)> {
        self.entry.map(|entry| (entry, self.cookie))
    }

    /// How the last wait ended. `None` while waiting or if it never waited.
    pub fn wake_reason(&self) -> Option<WakeReason> {
        self.wake_reason
    }

    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    pub fn is_blocked_on(&self, mask: BlockCondition) -> bool {
        self.state.block_condition().intersects(mask)
    }

    /// Add block reasons, leaving the ready/running state.
    pub(crate) fn block(&mut self, mask: BlockCondition) {
        let cond = self.state.block_condition() | mask;
        self.state = ThreadState::Blocked(cond);
    }

    /// Clear block reasons. Returns true when no reason remains.
    pub(crate) fn unblock(&mut self, mask: BlockCondition) -> bool {
        match self.state {
            ThreadState::Blocked(cond) => {
                let left = cond - mask;
                if left.is_empty() {
                    self.state = ThreadState::Ready;
                    true
                } else {
                    self.state = ThreadState::Blocked(left);
                    false
                }
            }
            _ => false,
        }
    }

    pub(crate) fn snapshot(&self, id: ThreadId) -> ThreadInfo {
        ThreadInfo {
            id,
            name: self.name.clone(),
            base_priority: self.base_prio,
            priority: self.cur_prio,
            state: self.state,
            flags: self.flags,
            cpu: self.cpu,
            wait_channel: self.wchan,
        }
    }
}

/// Consistent view of a thread, as reported by `Pod::threads`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub base_priority: u8,
    pub priority: u8,
    pub state: ThreadState,
    pub flags: ThreadFlags,
    pub cpu: CpuId,
    pub wait_channel: Option<SynchId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_reasons_accumulate() {
        let mut state = ThreadState::Ready;
        assert!(state.is_runnable());
        assert_eq!(state.block_condition(), BlockCondition::empty());

        state = ThreadState::Blocked(BlockCondition::PENDING | BlockCondition::DELAYED);
        assert!(!state.is_runnable());
        assert!(state.block_condition().contains(BlockCondition::DELAYED));
    }

    #[test]
    fn test_wake_reason_mapping() {
        assert_eq!(WakeReason::Normal.into_result(), Ok(()));
        assert_eq!(
            WakeReason::TimedOut.into_result(),
            Err(WaitError::TimedOut.into())
        );
        assert_eq!(
            WakeReason::Broken.into_result(),
            Err(WaitError::Broken.into())
        );
        assert_eq!(
            WakeReason::Removed.into_result(),
            Err(WaitError::Removed.into())
        );
    }
}
