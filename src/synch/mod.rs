//! Synchronization objects.
//!
//! A synchronization object is a wait queue plus, for objects created with
//! [`SynchFlags::PIP`], an owner. Personality layers build their mutexes,
//! semaphores and condition variables on top of it.
//!
//! # Priority inheritance
//!
//! While sleepers of an owned object outrank the owner's base priority, the
//! object is *claimed*: it sits in the owner's claim list and the owner runs
//! at the priority of the most urgent sleeper over all its claims. The boost
//! is recomputed whenever that set changes (a sleeper arrives, leaves, times
//! out or changes priority, or ownership moves), and it propagates down the
//! chain when the owner itself sleeps on another owned object.

use crate::arch::Hal;
use crate::arena::handle_type;
use crate::errors::{InvalidOperationError, NucleusError, NucleusResult, ResourceError};
use crate::sched::Pod;
use crate::thread::{BlockCondition, ThreadFlags, ThreadId, Timeout, WakeReason};
use alloc::vec::Vec;
use bitflags::bitflags;
use log::{debug, trace};

pub mod wait_queue;

pub use wait_queue::WaitQueue;

handle_type!(
    /// Handle naming a synchronization object.
    SynchId
);

bitflags! {
    /// Synchronization object attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SynchFlags: u8 {
        /// Sleepers queue by priority instead of arrival order
        const PRIO = 1 << 0;
        /// Owned object with priority inheritance. Implies `PRIO`.
        const PIP = 1 << 1;
        /// Owner is boosted by this object's sleepers. Internal.
        const CLAIMED = 1 << 2;
    }
}

/// Result of [`Pod::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// The object was free and now belongs to the caller
    Acquired,
    /// The caller sleeps until ownership is handed over or the wait fails
    Blocked,
}

pub struct Synch {
    pub(crate) flags: SynchFlags,
    pub(crate) owner: Option<ThreadId>,
    pub(crate) waiters: WaitQueue,
}

impl Synch {
    fn new(flags: SynchFlags) -> Self {
        let mut flags = flags - SynchFlags::CLAIMED;
        if flags.contains(SynchFlags::PIP) {
            flags |= SynchFlags::PRIO;
        }
        Self {
            flags,
            owner: None,
            waiters: WaitQueue::new(flags.contains(SynchFlags::PRIO)),
        }
    }

    fn inherits(&self) -> bool {
        self.flags.contains(SynchFlags::PIP)
    }
}

impl<H: Hal> Pod<H> {
    pub fn synch_init(&mut self, flags: SynchFlags) -> NucleusResult<SynchId> {
        let sid = self
            .synchs
            .insert(Synch::new(flags))
            .map_err(|_| NucleusError::from(ResourceError::TooManySynchs))?;
        debug!("synch {} created ({:?})", sid, flags);
        Ok(sid)
    }

    /// Destroy an object. Its sleepers are woken with [`WakeReason::Removed`].
    ///
    /// # Returns
    ///
    /// Whether any thread was sleeping on it.
    pub fn synch_destroy(&mut self, sid: SynchId) -> NucleusResult<bool> {
        let had_sleepers = self.flush_sleepers(sid, WakeReason::Removed)?;
        self.synchs.remove(sid);
        debug!("synch {} destroyed", sid);
        self.schedule();
        Ok(had_sleepers)
    }

    pub fn synch_owner(&self, sid: SynchId) -> NucleusResult<Option<ThreadId>> {
        Ok(self.synch(sid)?.owner)
    }

    /// Sleepers in wakeup order.
    pub fn synch_waiters(&self, sid: SynchId) -> NucleusResult<Vec<ThreadId>> {
        Ok(self.synch(sid)?.waiters.threads())
    }

    pub fn synch_pending(&self, sid: SynchId) -> NucleusResult<bool> {
        Ok(!self.synch(sid)?.waiters.is_empty())
    }

    /// Put the running thread to sleep on `sid`.
    ///
    /// Only legal from thread context. When the object is owned with
    /// priority inheritance, the owner is boosted as needed before the
    /// caller blocks. How the wait ended is reported afterwards by
    /// [`Pod::wake_reason`].
    pub fn sleep_on(&mut self, sid: SynchId, timeout: Timeout) -> NucleusResult<()> {
        let tid = self.thread_context()?;
        let synch = self.synch(sid)?;
        if synch.owner == Some(tid) {
            return Err(NucleusError::wrong_state());
        }
        let prio = self.thread(tid)?.cur_prio;

        self.block_thread(tid, BlockCondition::PENDING, timeout, Some(sid))?;
        if let Some(synch) = self.synchs.get_mut(sid) {
            synch.waiters.insert(tid, prio);
        }
        self.update_claim(sid);
        trace!("thread {} sleeps on synch {}", tid, sid);

        self.schedule();
        Ok(())
    }

    /// Take ownership of a priority-inheritance object, sleeping while it is
    /// owned by another thread.
    ///
    /// # Returns
    ///
    /// [`AcquireStatus::Blocked`] when the caller had to sleep. Ownership is
    /// handed over directly on wakeup, so once the wait ends normally the
    /// caller owns the object.
    pub fn acquire(&mut self, sid: SynchId, timeout: Timeout) -> NucleusResult<AcquireStatus> {
        let tid = self.thread_context()?;
        let synch = self.synch_mut(sid)?;
        if !synch.inherits() {
            return Err(InvalidOperationError::NotSupported.into());
        }
        match synch.owner {
            None => {
                synch.owner = Some(tid);
                trace!("thread {} owns synch {}", tid, sid);
                Ok(AcquireStatus::Acquired)
            }
            Some(owner) if owner == tid => Err(NucleusError::wrong_state()),
            Some(_) => {
                self.sleep_on(sid, timeout)?;
                Ok(AcquireStatus::Blocked)
            }
        }
    }

    /// Release an object owned by the running thread, handing it to the
    /// most urgent sleeper.
    pub fn release(&mut self, sid: SynchId) -> NucleusResult<Option<ThreadId>> {
        let tid = self.current().ok_or_else(NucleusError::wrong_context)?;
        let synch = self.synch(sid)?;
        if !synch.inherits() {
            return Err(InvalidOperationError::NotSupported.into());
        }
        if synch.owner != Some(tid) {
            return Err(InvalidOperationError::NotOwner.into());
        }
        let next = self.wake_one(sid)?;
        self.schedule();
        Ok(next)
    }

    /// Wake the first sleeper. For an owned object, ownership moves to it
    /// (or is dropped when nobody sleeps) and the old owner loses the boost
    /// this object gave it.
    pub fn wakeup_one(&mut self, sid: SynchId) -> NucleusResult<Option<ThreadId>> {
        let woken = self.wake_one(sid)?;
        self.schedule();
        Ok(woken)
    }

    /// Wake a specific sleeper. Returns false if it was not sleeping on `sid`.
    pub fn wakeup_this(&mut self, sid: SynchId, tid: ThreadId) -> NucleusResult<bool> {
        let synch = self.synch_mut(sid)?;
        if !synch.waiters.remove(tid) {
            return Ok(false);
        }
        if synch.inherits() {
            self.transfer_ownership(sid, Some(tid));
        }
        self.wake_sleeper(tid, WakeReason::Normal);
        self.schedule();
        Ok(true)
    }

    /// Wake every sleeper with `reason`. Ownership does not change.
    ///
    /// # Returns
    ///
    /// Whether any thread was sleeping.
    pub fn flush(&mut self, sid: SynchId, reason: WakeReason) -> NucleusResult<bool> {
        let flushed = self.flush_sleepers(sid, reason)?;
        self.schedule();
        Ok(flushed)
    }

    fn synch(&self, sid: SynchId) -> NucleusResult<&Synch> {
        self.synchs.get(sid).ok_or_else(NucleusError::bad_synch)
    }

    fn synch_mut(&mut self, sid: SynchId) -> NucleusResult<&mut Synch> {
        self.synchs.get_mut(sid).ok_or_else(NucleusError::bad_synch)
    }

    fn wake_one(&mut self, sid: SynchId) -> NucleusResult<Option<ThreadId>> {
        let synch = self.synch_mut(sid)?;
        let woken = synch.waiters.pop_front().map(|(tid, _)| tid);
        if synch.inherits() {
            self.transfer_ownership(sid, woken);
        }
        if let Some(tid) = woken {
            self.wake_sleeper(tid, WakeReason::Normal);
        }
        Ok(woken)
    }

    fn flush_sleepers(&mut self, sid: SynchId, reason: WakeReason) -> NucleusResult<bool> {
        let synch = self.synch_mut(sid)?;
        let sleepers = synch.waiters.drain();
        if sleepers.is_empty() {
            return Ok(false);
        }
        self.update_claim(sid);
        for tid in sleepers {
            self.wake_sleeper(tid, reason);
        }
        trace!("synch {} flushed ({:?})", sid, reason);
        Ok(true)
    }

    /// Detach a sleeper already taken off the wait queue and let it run.
    fn wake_sleeper(&mut self, tid: ThreadId, reason: WakeReason) {
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        thread.wchan = None;
        thread.wake_reason = Some(reason);
        let _ = self.resume_thread(tid, BlockCondition::PENDING);
    }

    /// Make `owner` the owner of `sid`, dropping the claim the previous
    /// owner held on it.
    fn transfer_ownership(&mut self, sid: SynchId, owner: Option<ThreadId>) {
        let Some(synch) = self.synchs.get_mut(sid) else {
            return;
        };
        let previous = core::mem::replace(&mut synch.owner, owner);
        let claimed = synch.flags.contains(SynchFlags::CLAIMED);
        synch.flags.remove(SynchFlags::CLAIMED);

        if let (true, Some(previous)) = (claimed, previous) {
            if let Some(thread) = self.threads.get_mut(previous) {
                thread.claims.retain(|&claim| claim != sid);
            }
            self.recompute_priority(previous);
        }
        if let Some(owner) = owner {
            trace!("synch {} handed to thread {}", sid, owner);
            self.update_claim(sid);
        }
    }

    /// A sleeper left the wait queue without being woken through it
    /// (timeout, forced unblock, deletion).
    pub(crate) fn forget_sleeper(&mut self, sid: SynchId, tid: ThreadId) {
        if let Some(synch) = self.synchs.get_mut(sid) {
            synch.waiters.remove(tid);
        }
        self.update_claim(sid);
    }

    /// A sleeper changed priority.
    pub(crate) fn requeue_sleeper(&mut self, sid: SynchId, tid: ThreadId, prio: u8) {
        let Some(synch) = self.synchs.get_mut(sid) else {
            return;
        };
        if !synch.waiters.contains(tid) {
            return;
        }
        synch.waiters.reposition(tid, prio);
        self.update_claim(sid);
    }

    /// Hand every object owned by `tid` to its next sleeper.
    pub(crate) fn release_ownerships(&mut self, tid: ThreadId) {
        let owned: Vec<SynchId> = self
            .synchs
            .iter()
            .filter(|(_, synch)| synch.owner == Some(tid))
            .map(|(sid, _)| sid)
            .collect();
        for sid in owned {
            let _ = self.wake_one(sid);
        }
    }

    /// Re-evaluate every claim `tid` could hold after its base priority
    /// changed.
    pub(crate) fn refresh_claims(&mut self, tid: ThreadId) {
        let owned: Vec<SynchId> = self
            .synchs
            .iter()
            .filter(|(_, synch)| synch.owner == Some(tid) && synch.inherits())
            .map(|(sid, _)| sid)
            .collect();
        for sid in owned {
            self.update_claim(sid);
        }
        self.recompute_priority(tid);
    }

    /// Bring the claim of `sid` on its owner in line with its sleepers, then
    /// recompute the owner's priority.
    fn update_claim(&mut self, sid: SynchId) {
        let Some(synch) = self.synchs.get(sid) else {
            return;
        };
        let Some(owner) = synch.owner.filter(|_| synch.inherits()) else {
            return;
        };
        let Some(base) = self.threads.get(owner).map(|thread| thread.base_prio) else {
            return;
        };
        let wants = synch.waiters.top_priority().map_or(false, |top| top > base);
        let has = synch.flags.contains(SynchFlags::CLAIMED);

        if wants != has {
            if let Some(synch) = self.synchs.get_mut(sid) {
                synch.flags.set(SynchFlags::CLAIMED, wants);
            }
            if let Some(thread) = self.threads.get_mut(owner) {
                if wants {
                    thread.claims.push(sid);
                } else {
                    thread.claims.retain(|&claim| claim != sid);
                }
            }
        }
        self.recompute_priority(owner);
    }

    /// Set the current priority of `tid` to its base priority or the most
    /// urgent sleeper over its claims, whichever is higher.
    pub(crate) fn recompute_priority(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.get(tid) else {
            return;
        };
        let inherited = thread
            .claims
            .iter()
            .filter_map(|&sid| self.synchs.get(sid))
            .filter_map(|synch| synch.waiters.top_priority())
            .max();
        let target = inherited.map_or(thread.base_prio, |prio| prio.max(thread.base_prio));

        if let Some(thread) = self.threads.get_mut(tid) {
            let boosted = target > thread.base_prio;
            if boosted != thread.flags.contains(ThreadFlags::BOOSTED) {
                debug!(
                    "thread {} {} (priority {})",
                    tid,
                    if boosted { "boosted" } else { "unboosted" },
                    target
                );
            }
            thread.flags.set(ThreadFlags::BOOSTED, boosted);
        }
        self.apply_priority(tid, target);
    }
}
