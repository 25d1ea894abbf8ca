use super::NANOS_PER_SEC;
use core::time::Duration;

/// Frequency of a timer unit, with conversions to and from nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRate {
    frequency: u64,
}

impl TickRate {
    /// # Arguments
    ///
    /// * `frequency` - Timer units per second, at least 1
    pub const fn new(frequency: u64) -> Self {
        Self {
            frequency: if frequency == 0 { 1 } else { frequency },
        }
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn ticks_to_nanos(&self, ticks: u64) -> u64 {
        let nanos = ticks as u128 * NANOS_PER_SEC as u128 / self.frequency as u128;
        nanos.min(u64::MAX as u128) as u64
    }

    /// Convert nanoseconds to timer units, rounding up so a timeout never
    /// expires early.
    pub fn nanos_to_ticks(&self, nanos: u64) -> u64 {
        let scaled = nanos as u128 * self.frequency as u128;
        let ticks = (scaled + NANOS_PER_SEC as u128 - 1) / NANOS_PER_SEC as u128;
        ticks.min(u64::MAX as u128) as u64
    }

    pub fn duration_to_ticks(&self, duration: Duration) -> u64 {
        let nanos = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.nanos_to_ticks(nanos)
    }
}
