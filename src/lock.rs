//! The nucleus lock.
//!
//! A recursive, interrupt-masking lock usable from thread and interrupt
//! context. Acquiring it masks local interrupts first, then claims the owner
//! word; a CPU that already owns the lock only bumps the nesting depth. Other
//! CPUs spin until the word is released.
//!
//! Without the `smp` feature only one context can ever contend, so the lock is
//! reduced to interrupt masking plus the depth counter.
//!
//! There are no failure modes: waiting is unbounded. Code that must progress
//! in bounded time should not contend for it.

use crate::arch::{CpuId, Hal, IrqState};
use crate::errors::fatal;
use portable_atomic::{AtomicUsize, Ordering};

const NO_OWNER: usize = usize::MAX;

/// Restore token returned by [`NkLock::acquire`].
///
/// Carries the interrupt state to put back and whether this acquisition was
/// the outermost one on its CPU.
#[must_use = "the lock stays held until the token is released"]
#[derive(Debug)]
pub struct LockToken {
    irq: IrqState,
    nested: bool,
}

impl LockToken {
    /// Whether the CPU already held the lock when this token was issued.
    pub fn is_nested(&self) -> bool {
        self.nested
    }
}

/// Recursive IRQ-masking lock.
pub struct NkLock {
    owner: AtomicUsize,
    depth: AtomicUsize,
}

impl NkLock {
    pub const fn new() -> Self {
        Self {
            owner: AtomicUsize::new(NO_OWNER),
            depth: AtomicUsize::new(0),
        }
    }

    /// Mask local interrupts and take the lock for the calling CPU.
    pub fn acquire<H: Hal + ?Sized>(&self, hal: &H) -> LockToken {
        let irq = hal.irq_save();
        let cpu = hal.cpu_id();

        if self.owner.load(Ordering::Acquire) == cpu {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return LockToken { irq, nested: true };
        }

        #[cfg(feature = "smp")]
        while self
            .owner
            .compare_exchange_weak(NO_OWNER, cpu, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.owner.load(Ordering::Relaxed) != NO_OWNER {
                core::hint::spin_loop();
            }
        }

        #[cfg(not(feature = "smp"))]
        self.owner.store(cpu, Ordering::Relaxed);

        self.depth.store(1, Ordering::Relaxed);
        LockToken { irq, nested: false }
    }

    /// Try to take the lock without spinning.
    ///
    /// Local interrupts are left untouched when this fails.
    pub fn try_acquire<H: Hal + ?Sized>(&self, hal: &H) -> Option<LockToken> {
        let irq = hal.irq_save();
        let cpu = hal.cpu_id();

        if self.owner.load(Ordering::Acquire) == cpu {
            self.depth.fetch_add(1, Ordering::Relaxed);
            return Some(LockToken { irq, nested: true });
        }

        if self
            .owner
            .compare_exchange(NO_OWNER, cpu, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.depth.store(1, Ordering::Relaxed);
            Some(LockToken { irq, nested: false })
        } else {
            hal.irq_restore(irq);
            None
        }
    }

    /// Drop one nesting level and restore the interrupt state of `token`.
    pub fn release<H: Hal + ?Sized>(&self, hal: &H, token: LockToken) {
        let cpu = hal.cpu_id();
        if self.owner.load(Ordering::Relaxed) != cpu {
            fatal!("nucleus lock released by CPU {} which does not own it", cpu);
        }

        if token.nested {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        } else {
            self.depth.store(0, Ordering::Relaxed);
            self.owner.store(NO_OWNER, Ordering::Release);
        }

        hal.irq_restore(token.irq);
    }

    /// Run `f` with the lock held.
    pub fn with<H: Hal + ?Sized, R>(&self, hal: &H, f: impl FnOnce() -> R) -> R {
        let token = self.acquire(hal);
        let result = f();
        self.release(hal, token);
        result
    }

    pub fn owner(&self) -> Option<CpuId> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            cpu => Some(cpu),
        }
    }

    pub fn is_owned_by(&self, cpu: CpuId) -> bool {
        self.owner() == Some(cpu)
    }

    /// Current nesting depth on the owning CPU, zero when free.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

impl Default for NkLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::SimHal;

    #[test]
    fn test_recursive_acquire() {
        let hal = SimHal::new(1);
        let lock = NkLock::new();

        let outer = lock.acquire(&hal);
        assert!(!outer.is_nested());
        assert!(!hal.irqs_enabled(0));

        let inner = lock.acquire(&hal);
        assert!(inner.is_nested());
        assert_eq!(lock.depth(), 2);

        lock.release(&hal, inner);
        assert!(lock.is_owned_by(0));
        assert!(!hal.irqs_enabled(0));

        lock.release(&hal, outer);
        assert_eq!(lock.owner(), None);
        assert_eq!(lock.depth(), 0);
        assert!(hal.irqs_enabled(0));
    }

    #[cfg(feature = "smp")]
    #[test]
    fn test_other_cpu_cannot_take_held_lock() {
        let hal = SimHal::new(2);
        let lock = NkLock::new();

        let token = lock.acquire(&hal);
        hal.set_cpu(1);
        assert!(lock.try_acquire(&hal).is_none());
        assert!(hal.irqs_enabled(1));

        hal.set_cpu(0);
        lock.release(&hal, token);

        hal.set_cpu(1);
        let token = lock.try_acquire(&hal).expect("lock is free");
        assert!(lock.is_owned_by(1));
        lock.release(&hal, token);
    }

    #[test]
    #[should_panic]
    fn test_release_by_non_owner_is_fatal() {
        let hal = SimHal::new(2);
        let lock = NkLock::new();
        let token = lock.acquire(&hal);
        hal.set_cpu(1);
        lock.release(&hal, token);
    }
}
