//! Hardware abstraction consumed by the nucleus.
//!
//! The nucleus never touches registers. Everything platform specific goes
//! through the [`Hal`] trait: reading the monotonic clock, programming the
//! one-shot alarm, masking interrupts, acknowledging lines, kicking remote
//! CPUs and switching thread contexts. One implementation exists per target
//! and is injected when the [`Nucleus`](crate::kernel::Nucleus) is built.

use crate::thread::ThreadId;

pub mod sim;

pub use sim::SimHal;

/// CPU identifier type.
pub type CpuId = usize;

/// Saved local interrupt state, returned by [`Hal::irq_save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqState(pub bool);

/// Architecture abstraction trait.
///
/// Methods take `&self`: implementations keep whatever per-CPU state they need
/// behind interior mutability, since the same instance is shared by every CPU.
pub trait Hal: Send + Sync {
    /// Identifier of the CPU executing the call.
    fn cpu_id(&self) -> CpuId;

    /// Number of CPUs brought up.
    fn cpu_count(&self) -> usize;

    /// Monotonic clock, in raw clock units.
    fn read_clock(&self) -> u64;

    /// Program the one-shot alarm to fire at absolute clock value `date`.
    fn program_alarm(&self, date: u64);

    /// Cancel any pending one-shot alarm.
    fn disarm_alarm(&self);

    /// Disable local interrupts and return the previous state.
    fn irq_save(&self) -> IrqState;

    /// Restore local interrupts to `state`.
    fn irq_restore(&self, state: IrqState);

    /// Unmask an interrupt line at the controller.
    fn irq_enable(&self, line: usize);

    /// Mask an interrupt line at the controller.
    fn irq_disable(&self, line: usize);

    /// End-of-interrupt: acknowledge and re-enable `line`.
    fn irq_end(&self, line: usize);

    /// Pass the interrupt on to the host (non real-time) domain.
    fn propagate_irq(&self, line: usize);

    /// Force `cpu` through its rescheduling path.
    fn send_ipi(&self, cpu: CpuId);

    /// Switch `cpu` from `prev` to `next`. `None` is the idle context.
    ///
    /// The nucleus calls this as the last step of a scheduling decision,
    /// after every queue update. A bare-metal port saves and restores
    /// register files here; the call returns when `prev` is scheduled again.
    fn switch_context(&self, cpu: CpuId, prev: Option<ThreadId>, next: Option<ThreadId>);
}
