//! Simulated hardware for host builds and tests.
//!
//! No context is actually switched: the simulated CPU keeps executing the
//! caller, and every hardware request is recorded so tests can check what the
//! nucleus asked for. The clock only moves when told to.

use super::{CpuId, Hal, IrqState};
use crate::thread::ThreadId;
use alloc::vec::Vec;
use portable_atomic::{AtomicU64, AtomicUsize, Ordering};

/// A hardware request observed by [`SimHal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HalEvent {
    AlarmProgrammed(u64),
    AlarmDisarmed,
    IrqEnabled(usize),
    IrqDisabled(usize),
    IrqEnded(usize),
    IrqPropagated(usize),
    Ipi(CpuId),
    Switch {
        cpu: CpuId,
        prev: Option<ThreadId>,
        next: Option<ThreadId>,
    },
}

/// Deterministic stand-in for a platform port.
pub struct SimHal {
    cpus: usize,
    current_cpu: AtomicUsize,
    clock: AtomicU64,
    alarm: spin::Mutex<Option<u64>>,
    irqs_on: spin::Mutex<Vec<bool>>,
    events: spin::Mutex<Vec<HalEvent>>,
}

impl SimHal {
    pub fn new(cpus: usize) -> Self {
        let cpus = cpus.max(1);
        let mut irqs_on = Vec::with_capacity(cpus);
        irqs_on.resize(cpus, true);

        Self {
            cpus,
            current_cpu: AtomicUsize::new(0),
            clock: AtomicU64::new(0),
            alarm: spin::Mutex::new(None),
            irqs_on: spin::Mutex::new(irqs_on),
            events: spin::Mutex::new(Vec::new()),
        }
    }

    /// Make subsequent calls execute on `cpu`.
    pub fn set_cpu(&self, cpu: CpuId) {
        assert!(cpu < self.cpus, "no such CPU: {}", cpu);
        self.current_cpu.store(cpu, Ordering::Release);
    }

    pub fn set_clock(&self, now: u64) {
        self.clock.store(now, Ordering::Release);
    }

    pub fn advance_clock(&self, delta: u64) -> u64 {
        self.clock.fetch_add(delta, Ordering::AcqRel) + delta
    }

    /// Date of the pending one-shot alarm, if any.
    pub fn alarm(&self) -> Option<u64> {
        *self.alarm.lock()
    }

    /// Whether the pending alarm is due at the current clock value.
    pub fn alarm_due(&self) -> bool {
        self.alarm()
            .map(|date| date <= self.clock.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn irqs_enabled(&self, cpu: CpuId) -> bool {
        self.irqs_on.lock()[cpu]
    }

    pub fn events(&self) -> Vec<HalEvent> {
        self.events.lock().clone()
    }

    /// Drain recorded events.
    pub fn take_events(&self) -> Vec<HalEvent> {
        core::mem::take(&mut *self.events.lock())
    }

    /// Context switches recorded so far, as `(cpu, prev, next)`.
    pub fn switches(&self) -> Vec<(CpuId, Option<ThreadId>, Option<ThreadId>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match *event {
                HalEvent::Switch { cpu, prev, next } => Some((cpu, prev, next)),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: HalEvent) {
        self.events.lock().push(event);
    }
}

impl Default for SimHal {
    fn default() -> Self {
        Self::new(1)
    }
}

impl Hal for SimHal {
    fn cpu_id(&self) -> CpuId {
        self.current_cpu.load(Ordering::Acquire)
    }

    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn read_clock(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    fn program_alarm(&self, date: u64) {
        *self.alarm.lock() = Some(date);
        self.record(HalEvent::AlarmProgrammed(date));
    }

    fn disarm_alarm(&self) {
        *self.alarm.lock() = None;
        self.record(HalEvent::AlarmDisarmed);
    }

    fn irq_save(&self) -> IrqState {
        let cpu = self.cpu_id();
        let mut irqs_on = self.irqs_on.lock();
        let was = irqs_on[cpu];
        irqs_on[cpu] = false;
        IrqState(was)
    }

    fn irq_restore(&self, state: IrqState) {
        let cpu = self.cpu_id();
        self.irqs_on.lock()[cpu] = state.0;
    }

    fn irq_enable(&self, line: usize) {
        self.record(HalEvent::IrqEnabled(line));
    }

    fn irq_disable(&self, line: usize) {
        self.record(HalEvent::IrqDisabled(line));
    }

    fn irq_end(&self, line: usize) {
        self.record(HalEvent::IrqEnded(line));
    }

    fn propagate_irq(&self, line: usize) {
        self.record(HalEvent::IrqPropagated(line));
    }

    fn send_ipi(&self, cpu: CpuId) {
        self.record(HalEvent::Ipi(cpu));
    }

    fn switch_context(&self, cpu: CpuId, prev: Option<ThreadId>, next: Option<ThreadId>) {
        self.record(HalEvent::Switch { cpu, prev, next });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irq_save_restore() {
        let hal = SimHal::new(2);
        hal.set_cpu(1);
        let state = hal.irq_save();
        assert_eq!(state, IrqState(true));
        assert!(!hal.irqs_enabled(1));
        assert!(hal.irqs_enabled(0));
        hal.irq_restore(state);
        assert!(hal.irqs_enabled(1));
    }

    #[test]
    fn test_alarm_due() {
        let hal = SimHal::new(1);
        hal.program_alarm(100);
        assert!(!hal.alarm_due());
        hal.advance_clock(100);
        assert!(hal.alarm_due());
        hal.disarm_alarm();
        assert_eq!(hal.alarm(), None);
        assert_eq!(
            hal.take_events(),
            alloc::vec![HalEvent::AlarmProgrammed(100), HalEvent::AlarmDisarmed]
        );
    }
}
