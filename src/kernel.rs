//! Nucleus handle.
//!
//! [`Nucleus`] couples a [`Pod`] with the nucleus lock and the HAL it was
//! built over. All access to the pod goes through [`Nucleus::with`], which
//! holds the lock (local interrupts masked) for the duration of the closure.
//! Context switches decided inside are carried out through the HAL after
//! the lock is dropped, so the lock is never held across a switch.
//!
//! Interrupt and IPI entry points of a platform port call
//! [`Nucleus::handle_irq`] and [`Nucleus::handle_ipi`]. Service routines and
//! timer handlers receive the pod directly and never go back through the
//! lock.

use crate::arch::Hal;
use crate::config::NucleusConfig;
use crate::errors::{fatal, NucleusResult};
use crate::lock::NkLock;
use crate::sched::{Pod, PodStats};
use crate::thread::ThreadInfo;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;

/// The real-time nucleus.
///
/// # Type Parameters
///
/// * `H` - Hardware abstraction of the target
pub struct Nucleus<H: Hal> {
    hal: Arc<H>,
    lock: NkLock,
    pod: UnsafeCell<Pod<H>>,
}

// SAFETY: the pod is only reached through `with`, which serializes every
// CPU on the nucleus lock and refuses re-entry on the owning CPU.
unsafe impl<H: Hal> Sync for Nucleus<H> {}

impl<H: Hal> Nucleus<H> {
    /// Bring up the nucleus over `hal`.
    pub fn new(hal: Arc<H>, config: NucleusConfig) -> NucleusResult<Self> {
        let pod = Pod::new(hal.clone(), config)?;
        Ok(Self {
            hal,
            lock: NkLock::new(),
            pod: UnsafeCell::new(pod),
        })
    }

    pub fn hal(&self) -> &H {
        &self.hal
    }

    pub fn lock(&self) -> &NkLock {
        &self.lock
    }

    /// Run `f` on the pod with the nucleus lock held.
    ///
    /// Calling this again from inside `f` on the same CPU is an internal
    /// error and halts; use the pod handed to `f` instead.
    pub fn with<R>(&self, f: impl FnOnce(&mut Pod<H>) -> R) -> R {
        let token = self.lock.acquire(&*self.hal);
        if token.is_nested() {
            fatal!("nucleus re-entered on CPU {}", self.hal.cpu_id());
        }

        // SAFETY: the outermost holder of the lock has exclusive access.
        let pod = unsafe { &mut *self.pod.get() };
        let result = f(pod);
        let switches = pod.take_switches();

        self.lock.release(&*self.hal, token);

        for switch in switches {
            self.hal.switch_context(switch.cpu, switch.prev, switch.next);
        }
        result
    }

    /// Run `f` under the nucleus lock without touching the pod. Nests.
    pub fn critical_section<R>(&self, f: impl FnOnce() -> R) -> R {
        self.lock.with(&*self.hal, f)
    }

    /// Interrupt entry: dispatch `line` on the calling CPU.
    pub fn handle_irq(&self, line: usize) {
        self.with(|pod| pod.dispatch_irq(line));
    }

    /// Rescheduling IPI entry.
    pub fn handle_ipi(&self) {
        self.with(|pod| pod.handle_ipi());
    }

    /// Explicit rescheduling point.
    pub fn schedule(&self) -> bool {
        self.with(|pod| pod.schedule())
    }

    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.with(|pod| pod.threads())
    }

    pub fn stats(&self) -> PodStats {
        self.with(|pod| pod.stats())
    }
}
