//! The pod: scheduler state and rescheduling.
//!
//! A [`Pod`] owns every nucleus object (threads, synchronization objects,
//! timers, interrupt objects) plus the per-CPU scheduling slots. Operations
//! that change who may run only mark the affected CPU for rescheduling; the
//! actual decision is taken by [`Pod::schedule`] at the next rescheduling
//! point, which every public operation ends with. Inside interrupt context
//! the decision waits for the outermost handler to return.
//!
//! Scheduling is strict priority with FIFO order inside a level. A running
//! thread keeps its CPU against ready threads of its own priority unless it
//! yields or its round-robin quantum runs out; a preempted thread goes back
//! to the head of its level, a rotated one to the tail.
//!
//! The pod never switches contexts itself. Each decision is queued as a
//! [`Switch`] that the owner of the pod hands to the HAL once the nucleus
//! lock is released (see [`Nucleus`](crate::kernel::Nucleus)).

use crate::arch::{CpuId, Hal};
use crate::arena::Arena;
use crate::config::{NucleusConfig, TimerMode, MAX_CPUS};
use crate::errors::{fatal, InvalidOperationError, NucleusError, NucleusResult};
use crate::intr::{Interrupt, InterruptId};
use crate::synch::{Synch, SynchId};
use crate::thread::{Thread, ThreadFlags, ThreadId, ThreadInfo, ThreadState, WakeReason};
use crate::time::TickRate;
use crate::timer::{Timer, TimerAction, TimerId, TimerStatus, TimerWheel};
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, info, trace};

pub mod lifecycle;
pub mod queue;

pub use queue::ReadyQueue;

/// A scheduling decision waiting to be carried out by the HAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub cpu: CpuId,
    pub prev: Option<ThreadId>,
    pub next: Option<ThreadId>,
}

/// Scheduling counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PodStats {
    /// Rescheduling decisions taken
    pub schedules: u64,
    /// Decisions that changed the running thread
    pub switches: u64,
    /// Rescheduling IPIs sent
    pub ipis: u64,
    /// Interrupts dispatched
    pub irqs: u64,
    /// Interrupts no handler claimed
    pub spurious_irqs: u64,
    /// Timer shots processed
    pub timer_shots: u64,
}

/// Per-CPU scheduling slot.
pub(crate) struct CpuSched {
    pub(crate) rq: ReadyQueue,
    pub(crate) curr: Option<ThreadId>,
    /// Interrupt nesting depth
    pub(crate) nesting: u32,
    pub(crate) resched: bool,
    /// Move the running thread to the tail of its level at the next decision
    pub(crate) rotate: bool,
    pub(crate) ipi_sent: bool,
    pub(crate) rr_timer: TimerId,
}

/// Scheduler state of the nucleus.
pub struct Pod<H: Hal> {
    pub(crate) hal: Arc<H>,
    pub(crate) config: NucleusConfig,
    pub(crate) threads: Arena<ThreadId, Thread>,
    pub(crate) synchs: Arena<SynchId, Synch>,
    pub(crate) timers: Arena<TimerId, Timer<H>>,
    pub(crate) interrupts: Arena<InterruptId, Interrupt<H>>,
    /// Attached interrupt objects per line, in attach order
    pub(crate) lines: Vec<Vec<InterruptId>>,
    pub(crate) wheel: TimerWheel,
    pub(crate) cpus: Vec<CpuSched>,
    pub(crate) jiffies: u64,
    /// A wheel scan is in progress
    pub(crate) timer_scan: bool,
    /// Timer whose action is executing
    pub(crate) running_timer: Option<TimerId>,
    pub(crate) switches: Vec<Switch>,
    pub(crate) stats: PodStats,
}

impl<H: Hal> Pod<H> {
    /// Build a pod over `hal`.
    ///
    /// # Returns
    ///
    /// The pod with every CPU idle, or an error if the configuration does
    /// not name exactly the CPUs the HAL brought up.
    pub fn new(hal: Arc<H>, config: NucleusConfig) -> NucleusResult<Self> {
        if config.cpus == 0 || config.cpus > MAX_CPUS || config.cpus != hal.cpu_count() {
            return Err(InvalidOperationError::InvalidCpu(config.cpus).into());
        }
        if config.rr_period == 0 {
            return Err(InvalidOperationError::ZeroInterval.into());
        }

        let wheel = match config.timer_mode {
            TimerMode::Periodic { wheel_size } => TimerWheel::periodic(wheel_size),
            TimerMode::Aperiodic => TimerWheel::aperiodic(),
        };

        let mut pod = Self {
            hal,
            threads: Arena::with_limit(config.max_threads),
            synchs: Arena::with_limit(config.max_synchs),
            // One round-robin timer per CPU on top of the configured budget.
            timers: Arena::with_limit(config.max_timers + config.cpus),
            interrupts: Arena::with_limit(config.max_interrupts),
            lines: (0..config.irq_lines).map(|_| Vec::new()).collect(),
            wheel,
            cpus: Vec::with_capacity(config.cpus),
            jiffies: 0,
            timer_scan: false,
            running_timer: None,
            switches: Vec::new(),
            stats: PodStats::default(),
            config,
        };

        for cpu in 0..pod.config.cpus {
            let rr_timer = pod.create_timer(TimerAction::RoundRobin(cpu))?;
            pod.cpus.push(CpuSched {
                rq: ReadyQueue::new(),
                curr: None,
                nesting: 0,
                resched: false,
                rotate: false,
                ipi_sent: false,
                rr_timer,
            });
        }

        info!(
            "pod up: {} CPU(s), {:?} timer mode",
            pod.config.cpus, pod.config.timer_mode
        );
        Ok(pod)
    }

    pub fn config(&self) -> &NucleusConfig {
        &self.config
    }

    pub fn hal(&self) -> &Arc<H> {
        &self.hal
    }

    pub fn tick_rate(&self) -> TickRate {
        TickRate::new(self.config.clock_hz)
    }

    /// Thread running on the calling CPU.
    pub fn current(&self) -> Option<ThreadId> {
        self.cpus[self.hal.cpu_id()].curr
    }

    pub fn current_on(&self, cpu: CpuId) -> Option<ThreadId> {
        self.cpus.get(cpu).and_then(|slot| slot.curr)
    }

    /// Interrupt nesting depth of the calling CPU.
    pub fn nesting(&self) -> u32 {
        self.cpus[self.hal.cpu_id()].nesting
    }

    pub fn in_interrupt(&self) -> bool {
        self.nesting() > 0
    }

    pub fn resched_pending(&self, cpu: CpuId) -> bool {
        self.cpus.get(cpu).map_or(false, |slot| slot.resched)
    }

    /// Ready queue of `cpu`, most urgent first. The running thread is not in it.
    pub fn ready_threads(&self, cpu: CpuId) -> Vec<ThreadId> {
        self.cpus
            .get(cpu)
            .map(|slot| slot.rq.iter().map(|(tid, _)| tid).collect())
            .unwrap_or_default()
    }

    pub fn thread(&self, tid: ThreadId) -> NucleusResult<&Thread> {
        self.threads.get(tid).ok_or_else(NucleusError::bad_thread)
    }

    pub(crate) fn thread_mut(&mut self, tid: ThreadId) -> NucleusResult<&mut Thread> {
        self.threads.get_mut(tid).ok_or_else(NucleusError::bad_thread)
    }

    /// How the last wait of `tid` ended.
    pub fn wake_reason(&self, tid: ThreadId) -> NucleusResult<Option<WakeReason>> {
        Ok(self.thread(tid)?.wake_reason)
    }

    /// Snapshot of every live thread.
    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.threads
            .iter()
            .map(|(tid, thread)| thread.snapshot(tid))
            .collect()
    }

    pub fn stats(&self) -> PodStats {
        self.stats
    }

    /// Running thread of the calling CPU, required to be in thread context.
    pub(crate) fn thread_context(&self) -> NucleusResult<ThreadId> {
        let slot = &self.cpus[self.hal.cpu_id()];
        match slot.curr {
            Some(tid) if slot.nesting == 0 => Ok(tid),
            _ => Err(NucleusError::wrong_context()),
        }
    }

    pub(crate) fn set_resched(&mut self, cpu: CpuId) {
        self.cpus[cpu].resched = true;
    }

    /// Queue a thread at the tail of its level and decide whether it should
    /// preempt its CPU.
    pub(crate) fn make_ready(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        thread.state = ThreadState::Ready;
        let (cpu, prio) = (thread.cpu, thread.cur_prio);
        self.cpus[cpu].rq.enqueue(tid, prio);
        self.maybe_preempt(cpu, prio);
    }

    /// Mark `cpu` for rescheduling if a thread of priority `prio` became
    /// ready. Equal priority is enough to request a decision; the decision
    /// itself keeps the running thread on ties.
    pub(crate) fn maybe_preempt(&mut self, cpu: CpuId, prio: u8) {
        let preempt = match self.cpus[cpu].curr {
            None => true,
            Some(curr) => self
                .threads
                .get(curr)
                .map_or(true, |running| prio >= running.cur_prio),
        };
        if preempt {
            self.set_resched(cpu);
        }
    }

    /// Take a thread off its ready queue, or flag its CPU if it is running.
    pub(crate) fn unqueue(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.get(tid) else {
            return;
        };
        let (cpu, prio) = (thread.cpu, thread.cur_prio);
        match thread.state {
            ThreadState::Ready => {
                self.cpus[cpu].rq.remove(tid, prio);
            }
            ThreadState::Running => self.set_resched(cpu),
            _ => {}
        }
    }

    /// Change the current priority of a thread and move it wherever that
    /// priority matters: its ready queue level, its CPU's preemption state,
    /// and the wait queue (and owner) of the object it pends on.
    pub(crate) fn apply_priority(&mut self, tid: ThreadId, prio: u8) {
        let Some(thread) = self.threads.get_mut(tid) else {
            return;
        };
        let old = thread.cur_prio;
        if old == prio {
            return;
        }
        thread.cur_prio = prio;
        let (cpu, state, wchan) = (thread.cpu, thread.state, thread.wchan);
        trace!("thread {} priority {} -> {}", tid, old, prio);

        match state {
            ThreadState::Ready => {
                self.cpus[cpu].rq.remove(tid, old);
                self.cpus[cpu].rq.enqueue(tid, prio);
                self.maybe_preempt(cpu, prio);
            }
            ThreadState::Running if prio < old => self.set_resched(cpu),
            _ => {}
        }

        if let Some(sid) = wchan {
            self.requeue_sleeper(sid, tid, prio);
        }
    }

    /// Rescheduling point.
    ///
    /// Kicks remote CPUs that were marked, then, if the calling CPU is marked
    /// and not in interrupt context, picks the most urgent runnable thread.
    /// Returns whether the running thread changed.
    pub fn schedule(&mut self) -> bool {
        let cpu = self.hal.cpu_id();
        self.kick_remote_cpus(cpu);

        let slot = &mut self.cpus[cpu];
        if slot.nesting > 0 || !slot.resched {
            return false;
        }
        slot.resched = false;
        self.stats.schedules += 1;

        let prev = self.cpus[cpu].curr;
        if let Some(prev) = prev {
            if self.keeps_cpu(cpu, prev) {
                return false;
            }
        }

        let rotate = core::mem::take(&mut self.cpus[cpu].rotate);
        let mut zombie = None;
        if let Some(prev) = prev {
            if let Some(thread) = self.threads.get_mut(prev) {
                match thread.state {
                    ThreadState::Running => {
                        thread.state = ThreadState::Ready;
                        let prio = thread.cur_prio;
                        if rotate {
                            self.cpus[cpu].rq.enqueue(prev, prio);
                        } else {
                            self.cpus[cpu].rq.requeue(prev, prio);
                        }
                    }
                    ThreadState::Zombie => zombie = Some(prev),
                    _ => {}
                }
            }
        }

        let next = self.cpus[cpu].rq.pop().map(|(tid, _)| tid);
        if let Some(next) = next {
            if let Some(thread) = self.threads.get_mut(next) {
                thread.state = ThreadState::Running;
            }
            self.arm_rr_timer(cpu, next);
        }
        self.cpus[cpu].curr = next;

        let switched = next != prev;
        if switched {
            self.stats.switches += 1;
            trace!("CPU {}: switch {:?} -> {:?}", cpu, prev, next);
            self.switches.push(Switch { cpu, prev, next });
        }

        if let Some(zombie) = zombie {
            self.finalize_thread(zombie);
        }
        switched
    }

    /// Handle a rescheduling IPI on the calling CPU.
    pub fn handle_ipi(&mut self) -> bool {
        let cpu = self.hal.cpu_id();
        self.cpus[cpu].ipi_sent = false;
        self.schedule()
    }

    /// Drain the context switches decided since the last call.
    pub fn take_switches(&mut self) -> Vec<Switch> {
        core::mem::take(&mut self.switches)
    }

    fn keeps_cpu(&self, cpu: CpuId, curr: ThreadId) -> bool {
        let Some(thread) = self.threads.get(curr) else {
            return false;
        };
        if thread.state != ThreadState::Running {
            return false;
        }
        if thread.flags.contains(ThreadFlags::LOCKED) {
            return true;
        }
        match self.cpus[cpu].rq.top_priority() {
            None => true,
            Some(top) if top < thread.cur_prio => true,
            Some(top) if top == thread.cur_prio => !self.cpus[cpu].rotate,
            Some(_) => false,
        }
    }

    fn kick_remote_cpus(&mut self, local: CpuId) {
        for (cpu, slot) in self.cpus.iter_mut().enumerate() {
            if cpu != local && slot.resched && !slot.ipi_sent {
                slot.ipi_sent = true;
                self.stats.ipis += 1;
                self.hal.send_ipi(cpu);
            }
        }
    }

    /// Start the round-robin timer of `cpu` if `tid` is time sliced.
    pub(crate) fn arm_rr_timer(&mut self, cpu: CpuId, tid: ThreadId) {
        let sliced = self
            .threads
            .get(tid)
            .map_or(false, |thread| thread.flags.contains(ThreadFlags::ROUND_ROBIN));
        if !sliced {
            return;
        }
        let timer = self.cpus[cpu].rr_timer;
        if self.timer_status(timer) == Ok(TimerStatus::Queued) {
            return;
        }
        let period = self.config.rr_period;
        if let Err(err) = self.timer_start(timer, period, Some(period)) {
            fatal!("CPU {}: cannot arm round-robin timer: {}", cpu, err);
        }
    }

    /// Release what is left of a deleted thread.
    pub(crate) fn finalize_thread(&mut self, tid: ThreadId) {
        let Some(thread) = self.threads.remove(tid) else {
            return;
        };
        let _ = self.timer_destroy(thread.rtimer);
        let _ = self.timer_destroy(thread.ptimer);
        debug!("thread {} ({}) torn down", tid, thread.name);
    }
}
