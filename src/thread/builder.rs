use crate::arch::CpuId;
use crate::config::MIN_PRIO;

use alloc::string::String;

/// Creation attributes for `Pod::thread_init`.
#[derive(Debug, Clone)]
pub struct ThreadBuilder {
    pub(crate) name: Option<String>,
    pub(crate) priority: u8,
    pub(crate) cpu: CpuId,
    pub(crate) suspended: bool,
    pub(crate) fpu: bool,
    pub(crate) rr_quantum: Option<u64>,
}

impl ThreadBuilder {
    pub fn new() -> Self {
        Self {
            name: None,
            priority: MIN_PRIO,
            cpu: 0,
            suspended: false,
            fpu: false,
            rr_quantum: None,
        }
    }

    pub fn name<T: Into<String>>(mut self, name: T) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// CPU whose ready queue the thread joins.
    pub fn cpu(mut self, cpu: CpuId) -> Self {
        self.cpu = cpu;
        self
    }

    /// Start the thread suspended: `thread_start` leaves it blocked until
    /// an explicit resume.
    pub fn suspended(mut self, suspended: bool) -> Self {
        self.suspended = suspended;
        self
    }

    pub fn fpu(mut self, fpu: bool) -> Self {
        self.fpu = fpu;
        self
    }

    /// Enable round-robin with the given quantum.
    pub fn round_robin(mut self, quantum: u64) -> Self {
        self.rr_quantum = Some(quantum);
        self
    }
}

impl Default for ThreadBuilder {
    fn default() -> Self {
        Self::new()
    }
}
