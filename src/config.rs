//! Nucleus configuration.
//!
//! Compile-time limits live here as constants; the choices a platform port
//! makes at startup (timer mode, CPU count, time slice, alarm latency) are
//! carried by [`NucleusConfig`].

/// Highest thread priority. Priorities run `0..=MAX_PRIO`, higher is more urgent.
pub const MAX_PRIO: u8 = 255;

/// Lowest thread priority.
pub const MIN_PRIO: u8 = 0;

/// Common priority levels.
pub mod priority {
    pub const IDLE: u8 = 0;
    pub const LOW: u8 = 64;
    pub const NORMAL: u8 = 128;
    pub const HIGH: u8 = 192;
    pub const REALTIME: u8 = 255;
}

/// Number of distinct priority levels in a ready queue.
pub const PRIO_LEVELS: usize = MAX_PRIO as usize + 1;

/// Tick frequency of the periodic timer mode, in Hz.
pub const TIMER_FREQUENCY_HZ: u32 = 1000;

/// Default number of slots in the periodic timer wheel.
pub const DEFAULT_WHEEL_SIZE: usize = 64;

/// Default round-robin quantum, in ticks.
pub const DEFAULT_RR_QUANTUM: u64 = 10;

/// Default minimum distance, in clock units, between "now" and a programmed
/// one-shot alarm. Anything closer is fired immediately instead.
pub const MIN_ALARM_LATENCY: u64 = 2_000;

/// Maximum number of CPUs a pod manages.
pub const MAX_CPUS: usize = 64;

/// Default arena limits.
pub const DEFAULT_MAX_THREADS: usize = 256;
pub const DEFAULT_MAX_TIMERS: usize = 1024;
pub const DEFAULT_MAX_SYNCHS: usize = 1024;
pub const DEFAULT_MAX_INTERRUPTS: usize = 256;

/// Number of IRQ lines the dispatcher knows about.
pub const DEFAULT_IRQ_LINES: usize = 256;

/// Timer wheel operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fixed-rate hardware tick, timers bucketed in `wheel_size` slots.
    /// Dates and delays are expressed in ticks.
    Periodic { wheel_size: usize },
    /// One-shot hardware alarm reprogrammed for the earliest timer.
    /// Dates and delays are expressed in raw clock units.
    Aperiodic,
}

impl TimerMode {
    pub fn is_periodic(self) -> bool {
        matches!(self, TimerMode::Periodic { .. })
    }
}

/// What the dispatcher does with an IRQ on a line nobody is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnhandledIrq {
    /// Hand the interrupt to the host (non real-time) domain.
    Propagate,
    /// Acknowledge and forget it.
    Drop,
}

/// Startup configuration of a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NucleusConfig {
    pub timer_mode: TimerMode,
    pub cpus: usize,
    /// Round-robin quantum handed to threads that enable time slicing
    /// without giving their own, in ticks (periodic) or clock units (aperiodic).
    pub rr_quantum: u64,
    /// Interval of the per-CPU round-robin accounting timer. One tick in
    /// periodic mode.
    pub rr_period: u64,
    pub min_alarm_latency: u64,
    /// Frequency of the timer unit: the tick rate in periodic mode, the
    /// hardware clock rate in aperiodic mode.
    pub clock_hz: u64,
    pub irq_lines: usize,
    pub unhandled_irq: UnhandledIrq,
    pub max_threads: usize,
    pub max_timers: usize,
    pub max_synchs: usize,
    pub max_interrupts: usize,
}

impl NucleusConfig {
    /// Periodic-tick configuration for `cpus` processors.
    pub fn periodic(cpus: usize) -> Self {
        Self {
            timer_mode: TimerMode::Periodic {
                wheel_size: DEFAULT_WHEEL_SIZE,
            },
            cpus,
            rr_quantum: DEFAULT_RR_QUANTUM,
            rr_period: 1,
            min_alarm_latency: 0,
            clock_hz: TIMER_FREQUENCY_HZ as u64,
            irq_lines: DEFAULT_IRQ_LINES,
            unhandled_irq: UnhandledIrq::Propagate,
            max_threads: DEFAULT_MAX_THREADS,
            max_timers: DEFAULT_MAX_TIMERS,
            max_synchs: DEFAULT_MAX_SYNCHS,
            max_interrupts: DEFAULT_MAX_INTERRUPTS,
        }
    }

    /// Tickless configuration for `cpus` processors. `tick` is the clock
    /// distance used as one round-robin accounting period.
    pub fn aperiodic(cpus: usize, tick: u64) -> Self {
        Self {
            timer_mode: TimerMode::Aperiodic,
            rr_quantum: DEFAULT_RR_QUANTUM * tick,
            rr_period: tick,
            min_alarm_latency: MIN_ALARM_LATENCY,
            clock_hz: 1_000_000_000,
            ..Self::periodic(cpus)
        }
    }

    pub fn wheel_size(mut self, size: usize) -> Self {
        if let TimerMode::Periodic { .. } = self.timer_mode {
            self.timer_mode = TimerMode::Periodic { wheel_size: size };
        }
        self
    }

    pub fn rr_quantum(mut self, quantum: u64) -> Self {
        self.rr_quantum = quantum;
        self
    }

    pub fn min_alarm_latency(mut self, latency: u64) -> Self {
        self.min_alarm_latency = latency;
        self
    }

    pub fn clock_hz(mut self, hz: u64) -> Self {
        self.clock_hz = hz;
        self
    }

    pub fn unhandled_irq(mut self, policy: UnhandledIrq) -> Self {
        self.unhandled_irq = policy;
        self
    }

    pub fn irq_lines(mut self, lines: usize) -> Self {
        self.irq_lines = lines;
        self
    }

    pub fn max_threads(mut self, max: usize) -> Self {
        self.max_threads = max;
        self
    }

    pub fn max_timers(mut self, max: usize) -> Self {
        self.max_timers = max;
        self
    }
}

impl Default for NucleusConfig {
    fn default() -> Self {
        Self::periodic(1)
    }
}
