//! Nucleus timers.
//!
//! Timers are either one-shot or periodic and live on the pod's
//! [`TimerWheel`]. The wheel is processed from the clock interrupt through
//! [`Pod::do_timers`]: due timers are unlinked onto a side list first, then
//! their actions run one by one, then periodic timers that were neither stopped
//! nor re-armed by their own handler are queued again one interval later.
//!
//! Besides user handlers, timers drive thread timeouts, periodic releases and
//! round-robin accounting, so every thread owns two timers created with it.

use crate::arch::{CpuId, Hal};
use crate::arena::handle_type;
use crate::errors::{InvalidOperationError, NucleusError, NucleusResult, ResourceError};
use crate::sched::Pod;
use crate::thread::ThreadId;
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, trace};

pub mod wheel;

pub use wheel::{QueueKey, TimerWheel};

handle_type!(
    /// Handle naming a timer.
    TimerId
);

/// User timer handler. Runs from the clock interrupt with the pod borrowed.
pub type TimerHandler<H> = Arc<dyn Fn(&mut Pod<H>, TimerId) + Send + Sync>;

/// What a timer does when it fires.
pub enum TimerAction<H: Hal> {
    /// Wake `ThreadId` from a timed wait with a timeout indication
    ResourceTimeout(ThreadId),
    /// Release point of a periodic thread
    PeriodicRelease(ThreadId),
    /// Round-robin accounting tick of a CPU
    RoundRobin(CpuId),
    Handler(TimerHandler<H>),
}

impl<H: Hal> Clone for TimerAction<H> {
    fn clone(&self) -> Self {
        match self {
            TimerAction::ResourceTimeout(tid) => TimerAction::ResourceTimeout(*tid),
            TimerAction::PeriodicRelease(tid) => TimerAction::PeriodicRelease(*tid),
            TimerAction::RoundRobin(cpu) => TimerAction::RoundRobin(*cpu),
            TimerAction::Handler(handler) => TimerAction::Handler(handler.clone()),
        }
    }
}

/// Timer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerStatus {
    /// Not armed
    Dequeued,
    /// Armed and linked on the wheel
    Queued,
    /// Destroyed from its own handler; released once the handler returns
    Killed,
}

pub struct Timer<H: Hal> {
    pub(crate) action: TimerAction<H>,
    pub(crate) date: u64,
    pub(crate) interval: Option<u64>,
    pub(crate) status: TimerStatus,
    pub(crate) key: Option<QueueKey>,
    /// On the side list of the current scan. Cleared by stop and start so
    /// the scan neither fires nor reloads it.
    pub(crate) firing: bool,
    pub(crate) fired: u64,
    /// Periods skipped because the timer fell behind the clock
    pub(crate) overruns: u64,
}

impl<H: Hal> Timer<H> {
    fn new(action: TimerAction<H>) -> Self {
        Self {
            action,
            date: 0,
            interval: None,
            status: TimerStatus::Dequeued,
            key: None,
            firing: false,
            fired: 0,
            overruns: 0,
        }
    }
}

impl<H: Hal> Pod<H> {
    pub(crate) fn create_timer(&mut self, action: TimerAction<H>) -> NucleusResult<TimerId> {
        self.timers
            .insert(Timer::new(action))
            .map_err(|_| ResourceError::TooManyTimers.into())
    }

    /// Create an unarmed timer running `handler` when it fires.
    pub fn timer_init<F>(&mut self, handler: F) -> NucleusResult<TimerId>
    where
        F: Fn(&mut Pod<H>, TimerId) + Send + Sync + 'static,
    {
        let id = self.create_timer(TimerAction::Handler(Arc::new(handler)))?;
        debug!("timer {} created", id);
        Ok(id)
    }

    /// Current date in timer units: the tick count in periodic mode, the
    /// raw clock otherwise.
    pub fn now(&self) -> u64 {
        if self.config.timer_mode.is_periodic() {
            self.jiffies
        } else {
            self.hal.read_clock()
        }
    }

    /// Ticks elapsed since the pod started. Stays at zero in aperiodic mode.
    pub fn jiffies(&self) -> u64 {
        self.jiffies
    }

    /// Arm a timer.
    ///
    /// # Arguments
    ///
    /// * `delay` - Distance of the first shot from now. In periodic mode the
    ///   shortest delay is one tick.
    /// * `interval` - Reload interval, `None` for a one-shot timer.
    ///
    /// An armed timer is re-armed with the new values.
    pub fn timer_start(
        &mut self,
        id: TimerId,
        delay: u64,
        interval: Option<u64>,
    ) -> NucleusResult<()> {
        if interval == Some(0) {
            return Err(InvalidOperationError::ZeroInterval.into());
        }
        match self.timers.get(id) {
            Some(timer) if timer.status != TimerStatus::Killed => {}
            _ => return Err(NucleusError::bad_timer()),
        }

        let was_head = self.is_timer_head(id);
        self.unlink_timer(id);

        let now = self.now();
        let date = if self.config.timer_mode.is_periodic() {
            now.saturating_add(delay.max(1))
        } else if self.timer_scan {
            // Anything within the latency window would be picked up again by
            // the running scan.
            now.saturating_add(delay.max(self.config.min_alarm_latency + 1))
        } else {
            now.saturating_add(delay)
        };

        if let Some(timer) = self.timers.get_mut(id) {
            timer.interval = interval;
        }
        self.enqueue_timer(id, date);
        trace!("timer {} armed for {} (interval {:?})", id, date, interval);

        if was_head || self.is_timer_head(id) {
            self.program_next_shot();
        }
        Ok(())
    }

    /// Disarm a timer. Stopping an unarmed timer does nothing.
    pub fn timer_stop(&mut self, id: TimerId) -> NucleusResult<()> {
        if !self.timers.contains(id) {
            return Err(NucleusError::bad_timer());
        }
        let was_head = self.is_timer_head(id);
        if self.unlink_timer(id) {
            trace!("timer {} stopped", id);
        }
        if was_head {
            self.program_next_shot();
        }
        Ok(())
    }

    /// Disarm and free a timer.
    ///
    /// A handler destroying its own timer only marks it [`TimerStatus::Killed`];
    /// the slot is released once the handler returns.
    pub fn timer_destroy(&mut self, id: TimerId) -> NucleusResult<()> {
        self.timer_stop(id)?;
        if self.running_timer == Some(id) {
            if let Some(timer) = self.timers.get_mut(id) {
                timer.status = TimerStatus::Killed;
            }
        } else {
            self.timers.remove(id);
        }
        debug!("timer {} destroyed", id);
        Ok(())
    }

    /// Time left before the next shot, `None` when unarmed.
    pub fn timer_remaining(&self, id: TimerId) -> NucleusResult<Option<u64>> {
        let now = self.now();
        Ok(self
            .timer_date(id)?
            .map(|date| date.saturating_sub(now)))
    }

    /// Absolute date of the next shot, `None` when unarmed.
    pub fn timer_date(&self, id: TimerId) -> NucleusResult<Option<u64>> {
        let timer = self.timers.get(id).ok_or_else(NucleusError::bad_timer)?;
        Ok((timer.status == TimerStatus::Queued).then_some(timer.date))
    }

    pub fn timer_interval(&self, id: TimerId) -> NucleusResult<Option<u64>> {
        let timer = self.timers.get(id).ok_or_else(NucleusError::bad_timer)?;
        Ok(timer.interval)
    }

    pub fn timer_status(&self, id: TimerId) -> NucleusResult<TimerStatus> {
        let timer = self.timers.get(id).ok_or_else(NucleusError::bad_timer)?;
        Ok(timer.status)
    }

    /// How many times the timer fired, and how many periods it skipped.
    pub fn timer_counts(&self, id: TimerId) -> NucleusResult<(u64, u64)> {
        let timer = self.timers.get(id).ok_or_else(NucleusError::bad_timer)?;
        Ok((timer.fired, timer.overruns))
    }

    /// Process the timer wheel. Called once per clock interrupt.
    ///
    /// Periodic mode advances the tick count and scans the one slot it maps
    /// to. Aperiodic mode fires everything due within the alarm latency,
    /// rescanning while the new head is still that close, then programs the
    /// alarm for the head. Ends with a rescheduling point, which is deferred
    /// when called from an interrupt handler.
    pub fn do_timers(&mut self) {
        self.timer_scan = true;

        if self.config.timer_mode.is_periodic() {
            self.jiffies += 1;
            let due = self.wheel.take_due(self.jiffies);
            self.fire_timers(due);
        } else {
            loop {
                let limit = self
                    .hal
                    .read_clock()
                    .saturating_add(self.config.min_alarm_latency);
                let due = self.wheel.take_due(limit);
                if due.is_empty() {
                    break;
                }
                self.fire_timers(due);
            }
        }

        self.timer_scan = false;
        self.program_next_shot();
        self.schedule();
    }

    fn fire_timers(&mut self, due: Vec<TimerId>) {
        for &id in &due {
            if let Some(timer) = self.timers.get_mut(id) {
                timer.key = None;
                timer.status = TimerStatus::Dequeued;
                timer.firing = true;
            }
        }

        for id in due {
            let action = match self.timers.get_mut(id) {
                Some(timer) if timer.firing => {
                    timer.fired += 1;
                    timer.action.clone()
                }
                _ => continue,
            };

            self.stats.timer_shots += 1;
            self.running_timer = Some(id);
            self.run_timer_action(id, action);
            self.running_timer = None;

            self.reload_timer(id);
        }
    }

    fn reload_timer(&mut self, id: TimerId) {
        let periodic = self.config.timer_mode.is_periodic();
        let floor = self
            .hal
            .read_clock()
            .saturating_add(self.config.min_alarm_latency);

        let Some(timer) = self.timers.get_mut(id) else {
            return;
        };
        if timer.status == TimerStatus::Killed {
            self.timers.remove(id);
            return;
        }
        if !timer.firing {
            return;
        }
        timer.firing = false;

        let Some(interval) = timer.interval else {
            return;
        };
        let mut date = timer.date.saturating_add(interval);
        if !periodic && date <= floor {
            let missed = (floor - date) / interval + 1;
            timer.overruns += missed;
            date = date.saturating_add(missed * interval);
        }
        self.enqueue_timer(id, date);
    }

    fn run_timer_action(&mut self, id: TimerId, action: TimerAction<H>) {
        match action {
            TimerAction::ResourceTimeout(tid) => self.thread_timeout(tid),
            TimerAction::PeriodicRelease(tid) => self.periodic_release(tid),
            TimerAction::RoundRobin(cpu) => self.rr_tick(cpu),
            TimerAction::Handler(handler) => handler(self, id),
        }
    }

    fn enqueue_timer(&mut self, id: TimerId, date: u64) {
        let key = self.wheel.insert(id, date);
        if let Some(timer) = self.timers.get_mut(id) {
            timer.date = date;
            timer.key = Some(key);
            timer.status = TimerStatus::Queued;
            timer.firing = false;
        }
    }

    /// Take a timer off the wheel. Returns whether it was queued.
    fn unlink_timer(&mut self, id: TimerId) -> bool {
        let Some(timer) = self.timers.get_mut(id) else {
            return false;
        };
        timer.firing = false;
        match timer.key.take() {
            Some(key) => {
                timer.status = TimerStatus::Dequeued;
                self.wheel.remove(id, key);
                true
            }
            None => false,
        }
    }

    fn is_timer_head(&self, id: TimerId) -> bool {
        matches!(self.wheel.head(), Some((_, head)) if head == id)
    }

    /// Point the one-shot alarm at the wheel head. Deferred while a scan runs.
    fn program_next_shot(&mut self) {
        if self.config.timer_mode.is_periodic() || self.timer_scan {
            return;
        }
        match self.wheel.head() {
            Some((date, _)) => {
                let floor = self
                    .hal
                    .read_clock()
                    .saturating_add(self.config.min_alarm_latency);
                self.hal.program_alarm(date.max(floor));
            }
            None => self.hal.disarm_alarm(),
        }
    }
}
