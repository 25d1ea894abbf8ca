//! Conversions between wall time and timer units.
//!
//! The nucleus itself only deals in timer units (ticks in periodic mode,
//! raw clock units in aperiodic mode). Callers holding nanoseconds or
//! [`core::time::Duration`] values convert them here first.

mod tick;

pub use tick::TickRate;

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;
