#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![forbid(unreachable_pub)]

//! Real-time co-kernel nucleus.
//!
//! This library is the core of a real-time co-kernel: a nucleus that runs
//! alongside a general-purpose host OS and gives its own threads strictly
//! deterministic scheduling. API personalities (POSIX-like, RTOS emulations)
//! are built on top of it.
//!
//! # Building blocks
//!
//! - A fixed-priority preemptive scheduler with a per-thread state machine
//!   and per-CPU ready queues
//! - Synchronization objects with optional priority inheritance
//! - Timers on a periodic timer wheel or a tickless ordered list
//! - Interrupt objects and a dispatcher tracking interrupt nesting
//! - A recursive, interrupt-masking nucleus lock
//!
//! Everything platform specific sits behind the [`Hal`] trait. [`SimHal`]
//! implements it for host builds and tests.
//!
//! # Features
//!
//! - `smp`: Multi-processor support: the nucleus lock spins across CPUs (default)
//!
//! # Quick Start
//!
//! ```ignore
//! use rtnucleus::{Nucleus, NucleusConfig, SimHal, ThreadBuilder};
//! use alloc::sync::Arc;
//!
//! let nucleus = Nucleus::new(Arc::new(SimHal::new(1)), NucleusConfig::periodic(1))?;
//!
//! nucleus.with(|pod| {
//!     pod.attach_clock(0)?;
//!     let worker = pod.thread_init(ThreadBuilder::new().name("worker").priority(10))?;
//!     pod.thread_start(worker, worker_main, 0)
//! })?;
//!
//! // From the platform's interrupt vector:
//! nucleus.handle_irq(0);
//! ```

// Core modules
pub mod arch;
pub mod arena;
pub mod config;
pub mod errors;
pub mod intr;
pub mod kernel;
pub mod lock;
pub mod sched;
pub mod synch;
pub mod thread;
pub mod time;
pub mod timer;

#[cfg(test)]
extern crate std;

extern crate alloc;

#[cfg(test)]
mod tests;

// ============================================================================
// Public API
// ============================================================================

// Hardware abstraction
pub use arch::{CpuId, Hal, IrqState, SimHal};

// Nucleus
pub use kernel::Nucleus;
pub use lock::{LockToken, NkLock};

// Configuration
pub use config::{NucleusConfig, TimerMode, UnhandledIrq};

// Scheduler
pub use sched::{Pod, PodStats, Switch};

// Threads
pub use thread::{
    BlockCondition, PeriodWait, ThreadBuilder, ThreadFlags, ThreadId, ThreadInfo, ThreadState,
    Timeout, WakeReason,
};

// Synchronization
pub use synch::{AcquireStatus, SynchFlags, SynchId};

// Timers
pub use time::TickRate;
pub use timer::{TimerId, TimerStatus};

// Interrupts
pub use intr::{InterruptId, IntrFlags, IsrStatus};

// Errors
pub use errors::{NucleusError, NucleusResult};
