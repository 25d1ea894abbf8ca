//! Thread lifecycle operations.
//!
//! Creation, start, suspension and resumption, deletion, priority changes,
//! round-robin and periodic timelines. Each public operation ends with a
//! rescheduling point; the `*_thread` helpers do not, so they can be chained
//! from other nucleus paths.

use super::Pod;
use crate::arch::{CpuId, Hal};
use crate::errors::{InvalidOperationError, NucleusError, NucleusResult, ResourceError};
use crate::thread::{
    BlockCondition, PeriodWait, Thread, ThreadBuilder, ThreadEntry, ThreadFlags, ThreadId,
    ThreadState, Timeout, WakeReason,
};
use crate::timer::TimerAction;
use log::{debug, trace, warn};

impl<H: Hal> Pod<H> {
    /// Create a dormant thread.
    ///
    /// Its resource and periodic timers are created along with it, so a
    /// thread that exists can always time out without allocating.
    pub fn thread_init(&mut self, builder: ThreadBuilder) -> NucleusResult<ThreadId> {
        if builder.cpu >= self.cpus.len() {
            return Err(InvalidOperationError::InvalidCpu(builder.cpu).into());
        }
        let tid = self
            .threads
            .next_key()
            .ok_or(ResourceError::TooManyThreads)?;

        let rtimer = self.create_timer(TimerAction::ResourceTimeout(tid))?;
        let ptimer = match self.create_timer(TimerAction::PeriodicRelease(tid)) {
            Ok(timer) => timer,
            Err(err) => {
                self.timers.remove(rtimer);
                return Err(err);
            }
        };

        let mut thread = Thread::new(builder, rtimer, ptimer);
        if thread.flags.contains(ThreadFlags::ROUND_ROBIN) && thread.rr_quantum == 0 {
            thread.rr_quantum = self.config.rr_quantum;
            thread.rr_credit = thread.rr_quantum;
        }

        match self.threads.insert(thread) {
            Ok(id) => {
                debug_assert_eq!(id, tid);
                debug!("thread {} created", id);
                Ok(id)
            }
            Err(_) => {
                self.timers.remove(rtimer);
                self.timers.remove(ptimer);
                Err(ResourceError::TooManyThreads.into())
            }
        }
    }

    /// Start a dormant thread at `entry(cookie)`.
    ///
    /// A thread built with [`ThreadBuilder::suspended`] is left suspended.
    pub fn thread_start(
        &mut self,
        tid: ThreadId,
        entry: ThreadEntry,
        cookie: usize,
    ) -> NucleusResult<()> {
        let thread = self.thread_mut(tid)?;
        if thread.state != ThreadState::Dormant {
            return Err(NucleusError::wrong_state());
        }
        thread.entry = Some(entry);
        thread.cookie = cookie;

        if thread.start_suspended {
            thread.state = ThreadState::Blocked(BlockCondition::SUSPENDED);
        } else {
            self.make_ready(tid);
        }
        debug!("thread {} started", tid);
        self.schedule();
        Ok(())
    }

    /// Add block conditions to a thread.
    ///
    /// # Arguments
    ///
    /// * `mask` - Conditions to add; pending on an object is only possible
    ///   through [`Pod::sleep_on`]
    /// * `timeout` - With [`Timeout::After`], the thread is also delayed and
    ///   the wait ends with [`WakeReason::TimedOut`] once it elapses
    pub fn suspend(
        &mut self,
        tid: ThreadId,
        mask: BlockCondition,
        timeout: Timeout,
    ) -> NucleusResult<()> {
        if mask.contains(BlockCondition::PENDING) {
            return Err(InvalidOperationError::NotSupported.into());
        }
        if mask.is_empty() && timeout == Timeout::Infinite {
            return Ok(());
        }
        self.block_thread(tid, mask, timeout, None)?;
        self.schedule();
        Ok(())
    }

    /// Delay the running thread.
    pub fn delay(&mut self, ticks: u64) -> NucleusResult<()> {
        let tid = self.thread_context()?;
        self.block_thread(tid, BlockCondition::DELAYED, Timeout::After(ticks), None)?;
        self.schedule();
        Ok(())
    }

    /// Clear block conditions. The thread becomes ready once none is left.
    ///
    /// Ending the delay of a pending thread ends its wait too, and ending the
    /// wait cancels its timeout.
    pub fn resume(&mut self, tid: ThreadId, mask: BlockCondition) -> NucleusResult<()> {
        self.resume_thread(tid, mask)?;
        self.schedule();
        Ok(())
    }

    /// Break a thread out of a delay or a wait on an object. Explicit
    /// suspension is left alone.
    ///
    /// # Returns
    ///
    /// Whether the thread was waiting.
    pub fn unblock(&mut self, tid: ThreadId) -> NucleusResult<bool> {
        let waits = BlockCondition::PENDING | BlockCondition::DELAYED;
        let thread = self.thread_mut(tid)?;
        if !thread.is_blocked_on(waits) {
            return Ok(false);
        }
        thread.wake_reason = Some(WakeReason::Broken);
        self.resume_thread(tid, waits)?;
        self.schedule();
        Ok(true)
    }

    /// Delete a thread.
    ///
    /// The thread leaves every queue, its owned objects pass to their next
    /// waiter and its timers stop. A thread running on some CPU (the caller
    /// included) becomes a zombie and is torn down once that CPU switches
    /// away from it; any other thread is released immediately.
    pub fn thread_delete(&mut self, tid: ThreadId) -> NucleusResult<()> {
        let thread = self.thread(tid)?;
        if thread.state == ThreadState::Zombie {
            return Ok(());
        }
        let (cpu, state, wchan) = (thread.cpu, thread.state, thread.wchan);
        let (rtimer, ptimer) = (thread.rtimer, thread.ptimer);
        let running = self.cpus[cpu].curr == Some(tid);

        match state {
            ThreadState::Ready => {
                self.unqueue(tid);
            }
            ThreadState::Blocked(cond) if cond.contains(BlockCondition::PENDING) => {
                if let Some(sid) = wchan {
                    self.forget_sleeper(sid, tid);
                }
            }
            _ => {}
        }

        // Out of every queue before the objects it owns are handed over, so
        // dropping its boost cannot put it back on a run queue.
        let thread = self.thread_mut(tid)?;
        thread.state = ThreadState::Zombie;
        thread.flags |= ThreadFlags::KILLED;
        thread.wchan = None;
        thread.claims.clear();

        let _ = self.timer_stop(rtimer);
        let _ = self.timer_stop(ptimer);
        self.release_ownerships(tid);

        if running {
            debug!("thread {} deleted while running on CPU {}", tid, cpu);
            self.set_resched(cpu);
        } else {
            self.finalize_thread(tid);
        }
        self.schedule();
        Ok(())
    }

    /// Change the base priority of a thread.
    ///
    /// A boosted thread keeps its inherited priority while that is higher;
    /// the new base shows once the boost is dropped.
    pub fn set_priority(&mut self, tid: ThreadId, prio: u8) -> NucleusResult<()> {
        let thread = self.thread_mut(tid)?;
        if thread.state == ThreadState::Zombie {
            return Err(NucleusError::wrong_state());
        }
        thread.base_prio = prio;
        self.refresh_claims(tid);
        self.schedule();
        Ok(())
    }

    /// Give the CPU to the next ready thread of the same priority, if any.
    pub fn yield_now(&mut self) -> NucleusResult<()> {
        let tid = self.thread_context()?;
        let cpu = self.hal.cpu_id();
        let prio = self.thread(tid)?.cur_prio;
        if self.cpus[cpu].rq.level_len(prio) > 0 {
            self.cpus[cpu].rotate = true;
            self.set_resched(cpu);
        }
        self.schedule();
        Ok(())
    }

    /// Lock the scheduler: the running thread is not preempted until it
    /// unlocks as many times as it locked, or blocks.
    pub fn lock_sched(&mut self) -> NucleusResult<()> {
        let tid = self.thread_context()?;
        let thread = self.thread_mut(tid)?;
        thread.lock_depth += 1;
        thread.flags |= ThreadFlags::LOCKED;
        Ok(())
    }

    pub fn unlock_sched(&mut self) -> NucleusResult<()> {
        let tid = self.thread_context()?;
        let thread = self.thread_mut(tid)?;
        if thread.lock_depth == 0 {
            return Err(NucleusError::wrong_state());
        }
        thread.lock_depth -= 1;
        if thread.lock_depth == 0 {
            thread.flags.remove(ThreadFlags::LOCKED);
            let cpu = thread.cpu;
            self.set_resched(cpu);
            self.schedule();
        }
        Ok(())
    }

    /// Enable or disable time slicing. `Some(0)` picks the configured quantum.
    pub fn set_round_robin(&mut self, tid: ThreadId, quantum: Option<u64>) -> NucleusResult<()> {
        let default_quantum = self.config.rr_quantum;
        let thread = self.thread_mut(tid)?;
        match quantum {
            Some(quantum) => {
                let quantum = if quantum == 0 { default_quantum } else { quantum };
                thread.flags |= ThreadFlags::ROUND_ROBIN;
                thread.rr_quantum = quantum;
                thread.rr_credit = quantum;
            }
            None => thread.flags.remove(ThreadFlags::ROUND_ROBIN),
        }
        let cpu = thread.cpu;
        if self.cpus[cpu].curr == Some(tid) {
            self.arm_rr_timer(cpu, tid);
        }
        Ok(())
    }

    /// Give a thread a periodic timeline.
    ///
    /// # Arguments
    ///
    /// * `start` - Delay of the first release point, one period if `None`
    /// * `period` - Distance between release points, non-zero
    pub fn set_periodic(
        &mut self,
        tid: ThreadId,
        start: Option<u64>,
        period: u64,
    ) -> NucleusResult<()> {
        if period == 0 {
            return Err(InvalidOperationError::ZeroInterval.into());
        }
        let thread = self.thread_mut(tid)?;
        thread.period = Some(period);
        thread.overruns = 0;
        let ptimer = thread.ptimer;
        self.timer_start(ptimer, start.unwrap_or(period), Some(period))?;
        debug!("thread {} periodic, period {}", tid, period);
        Ok(())
    }

    /// Drop the periodic timeline. A thread waiting for its release point
    /// is woken with [`WakeReason::Broken`].
    pub fn clear_periodic(&mut self, tid: ThreadId) -> NucleusResult<()> {
        let thread = self.thread_mut(tid)?;
        thread.period = None;
        thread.overruns = 0;
        let (ptimer, waiting) = (thread.ptimer, thread.awaiting_release);
        if waiting {
            thread.wake_reason = Some(WakeReason::Broken);
        }
        self.timer_stop(ptimer)?;
        if waiting {
            self.resume_thread(tid, BlockCondition::DELAYED)?;
        }
        self.schedule();
        Ok(())
    }

    /// Wait for the next release point of the running thread.
    ///
    /// # Returns
    ///
    /// [`PeriodWait::Overrun`] with the number of missed release points if
    /// the thread fell behind (it does not block then), otherwise
    /// [`PeriodWait::Blocked`].
    pub fn wait_period(&mut self) -> NucleusResult<PeriodWait> {
        let tid = self.thread_context()?;
        let thread = self.thread_mut(tid)?;
        if thread.period.is_none() {
            return Err(InvalidOperationError::NotPeriodic.into());
        }
        if thread.overruns > 0 {
            let missed = core::mem::take(&mut thread.overruns);
            return Ok(PeriodWait::Overrun(missed));
        }
        thread.awaiting_release = true;
        self.block_thread(tid, BlockCondition::DELAYED, Timeout::Infinite, None)?;
        self.schedule();
        Ok(PeriodWait::Blocked)
    }

    /// Add block conditions without rescheduling.
    pub(crate) fn block_thread(
        &mut self,
        tid: ThreadId,
        mask: BlockCondition,
        timeout: Timeout,
        wchan: Option<crate::synch::SynchId>,
    ) -> NucleusResult<()> {
        let thread = self.thread(tid)?;
        if matches!(thread.state, ThreadState::Dormant | ThreadState::Zombie) {
            return Err(NucleusError::wrong_state());
        }
        let rtimer = thread.rtimer;

        let mut mask = mask;
        if let Timeout::After(_) = timeout {
            mask |= BlockCondition::DELAYED;
        }

        self.unqueue(tid);
        let thread = self.thread_mut(tid)?;
        if mask.intersects(BlockCondition::PENDING | BlockCondition::DELAYED) {
            thread.wake_reason = None;
        }
        if wchan.is_some() {
            thread.wchan = wchan;
        }
        thread.block(mask);

        if let Timeout::After(delay) = timeout {
            self.timer_start(rtimer, delay, None)?;
        }
        trace!("thread {} blocked on {:?}", tid, mask);
        Ok(())
    }

    /// Clear block conditions without rescheduling.
    pub(crate) fn resume_thread(
        &mut self,
        tid: ThreadId,
        mask: BlockCondition,
    ) -> NucleusResult<()> {
        let thread = self.thread(tid)?;
        let cond = thread.state.block_condition();
        let mut clear = mask & cond;
        if clear.is_empty() {
            return Ok(());
        }

        let waits = BlockCondition::PENDING | BlockCondition::DELAYED;
        if cond.contains(BlockCondition::PENDING) && clear.intersects(waits) {
            clear |= waits & cond;
        }

        let (rtimer, wchan) = (thread.rtimer, thread.wchan);
        if clear.contains(BlockCondition::DELAYED) {
            self.timer_stop(rtimer)?;
        }
        if clear.contains(BlockCondition::PENDING) {
            if let Some(sid) = wchan {
                self.forget_sleeper(sid, tid);
            }
        }

        let thread = self.thread_mut(tid)?;
        if clear.contains(BlockCondition::DELAYED) {
            thread.awaiting_release = false;
        }
        if clear.contains(BlockCondition::PENDING) {
            thread.wchan = None;
        }
        if thread.unblock(clear) {
            self.make_ready(tid);
        }
        trace!("thread {} resumed from {:?}", tid, clear);
        Ok(())
    }

    /// Resource timer of `tid` fired.
    pub(crate) fn thread_timeout(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        if !thread.is_blocked_on(BlockCondition::DELAYED) {
            return;
        }
        thread.wake_reason = Some(WakeReason::TimedOut);
        let _ = self.resume_thread(tid, BlockCondition::DELAYED);
    }

    /// Periodic timer of `tid` fired.
    pub(crate) fn periodic_release(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        if thread.awaiting_release {
            thread.wake_reason = Some(WakeReason::Normal);
            let _ = self.resume_thread(tid, BlockCondition::DELAYED);
        } else {
            thread.overruns += 1;
            warn!("thread {} missed a release point ({} pending)", tid, thread.overruns);
        }
    }

    /// Round-robin accounting tick of `cpu`.
    pub(crate) fn rr_tick(&mut self, cpu: CpuId) {
        let rr_timer = self.cpus[cpu].rr_timer;
        let sliced = self.cpus[cpu].curr.and_then(|tid| {
            self.threads.get(tid).filter(|thread| {
                thread.flags.contains(ThreadFlags::ROUND_ROBIN)
                    && thread.state == ThreadState::Running
            })
        });
        if sliced.is_none() {
            let _ = self.timer_stop(rr_timer);
            return;
        }

        let period = self.config.rr_period;
        let Some(tid) = self.cpus[cpu].curr else {
            return;
        };
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        if thread.flags.contains(ThreadFlags::LOCKED) {
            return;
        }
        thread.rr_credit = thread.rr_credit.saturating_sub(period);
        if thread.rr_credit > 0 {
            return;
        }
        thread.rr_credit = thread.rr_quantum;
        let prio = thread.cur_prio;
        if self.cpus[cpu].rq.level_len(prio) > 0 {
            trace!("CPU {}: quantum of thread {} expired", cpu, tid);
            self.cpus[cpu].rotate = true;
            self.set_resched(cpu);
        }
    }
}
