//! Interrupt objects and dispatch.
//!
//! An interrupt object binds a service routine and a cookie to an IRQ line.
//! Attaching links it into the line's handler list; a line takes several
//! objects only if all of them were created [`IntrFlags::SHARED`].
//!
//! [`Pod::dispatch_irq`] runs with the CPU's nesting counter raised, so any
//! rescheduling a routine triggers is held back until the outermost
//! interrupt returns.

use crate::arch::Hal;
use crate::arena::handle_type;
use crate::config::UnhandledIrq;
use crate::errors::{IrqError, NucleusError, NucleusResult, ResourceError};
use crate::sched::Pod;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use log::{debug, trace, warn};

handle_type!(
    /// Handle naming an interrupt object.
    InterruptId
);

bitflags! {
    /// Interrupt object attributes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntrFlags: u8 {
        /// May share its line with other shared objects
        const SHARED = 1 << 0;
    }
}

bitflags! {
    /// Service routine outcome. Statuses of all routines on a line are OR-ed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IsrStatus: u8 {
        /// The routine recognized the interrupt
        const HANDLED = 1 << 0;
        /// Acknowledge and re-enable the line
        const ENABLE = 1 << 1;
        /// Pass the interrupt on to the host domain
        const PROPAGATE = 1 << 2;
    }
}

/// Interrupt service routine: receives the pod, the object and its cookie.
pub type Isr<H> = Arc<dyn Fn(&mut Pod<H>, InterruptId, usize) -> IsrStatus + Send + Sync>;

pub struct Interrupt<H: Hal> {
    pub(crate) line: usize,
    pub(crate) isr: Isr<H>,
    pub(crate) cookie: usize,
    pub(crate) flags: IntrFlags,
    pub(crate) hits: u64,
    pub(crate) attached: bool,
}

impl<H: Hal> Pod<H> {
    /// Create a detached interrupt object for `line`.
    pub fn intr_init<F>(
        &mut self,
        line: usize,
        flags: IntrFlags,
        cookie: usize,
        isr: F,
    ) -> NucleusResult<InterruptId>
    where
        F: Fn(&mut Pod<H>, InterruptId, usize) -> IsrStatus + Send + Sync + 'static,
    {
        if line >= self.lines.len() {
            return Err(ResourceError::LineOutOfRange(line).into());
        }
        let id = self
            .interrupts
            .insert(Interrupt {
                line,
                isr: Arc::new(isr),
                cookie,
                flags,
                hits: 0,
                attached: false,
            })
            .map_err(|_| NucleusError::from(ResourceError::TooManyInterrupts))?;
        debug!("interrupt {} created on line {}", id, line);
        Ok(id)
    }

    /// Link an interrupt object into its line's handler list.
    ///
    /// Fails with [`IrqError::Busy`] when the line already has a handler and
    /// either side is not shared. Attaching twice is a no-op.
    pub fn intr_attach(&mut self, id: InterruptId) -> NucleusResult<()> {
        let intr = self.interrupts.get(id).ok_or_else(NucleusError::bad_interrupt)?;
        if intr.attached {
            return Ok(());
        }
        let (line, shared) = (intr.line, intr.flags.contains(IntrFlags::SHARED));

        let sharable = self.lines[line].iter().all(|&other| {
            self.interrupts
                .get(other)
                .map_or(true, |other| other.flags.contains(IntrFlags::SHARED))
        });
        if !self.lines[line].is_empty() && !(shared && sharable) {
            return Err(IrqError::Busy(line).into());
        }

        self.lines[line].push(id);
        if let Some(intr) = self.interrupts.get_mut(id) {
            intr.attached = true;
        }
        debug!("interrupt {} attached to line {}", id, line);
        Ok(())
    }

    /// Unlink an interrupt object from its line. Detaching twice is a no-op.
    pub fn intr_detach(&mut self, id: InterruptId) -> NucleusResult<()> {
        let intr = self
            .interrupts
            .get_mut(id)
            .ok_or_else(NucleusError::bad_interrupt)?;
        if !intr.attached {
            return Ok(());
        }
        intr.attached = false;
        let line = intr.line;
        self.lines[line].retain(|&other| other != id);
        debug!("interrupt {} detached from line {}", id, line);
        Ok(())
    }

    /// Unmask the object's line at the controller.
    pub fn intr_enable(&mut self, id: InterruptId) -> NucleusResult<()> {
        let line = self.intr_line(id)?;
        self.hal.irq_enable(line);
        Ok(())
    }

    /// Mask the object's line at the controller.
    pub fn intr_disable(&mut self, id: InterruptId) -> NucleusResult<()> {
        let line = self.intr_line(id)?;
        self.hal.irq_disable(line);
        Ok(())
    }

    pub fn intr_destroy(&mut self, id: InterruptId) -> NucleusResult<()> {
        self.intr_detach(id)?;
        self.interrupts.remove(id);
        debug!("interrupt {} destroyed", id);
        Ok(())
    }

    pub fn intr_line(&self, id: InterruptId) -> NucleusResult<usize> {
        self.interrupts
            .get(id)
            .map(|intr| intr.line)
            .ok_or_else(NucleusError::bad_interrupt)
    }

    /// Number of interrupts the object's routine reported as handled.
    pub fn intr_hits(&self, id: InterruptId) -> NucleusResult<u64> {
        self.interrupts
            .get(id)
            .map(|intr| intr.hits)
            .ok_or_else(NucleusError::bad_interrupt)
    }

    /// Dispatch an interrupt on `line` to the routines attached to it.
    ///
    /// Routines may dispatch further interrupts (nesting). When no routine
    /// claims the interrupt it is propagated or acknowledged according to
    /// [`UnhandledIrq`]. Rescheduling happens once the outermost dispatch
    /// returns.
    pub fn dispatch_irq(&mut self, line: usize) {
        let cpu = self.hal.cpu_id();
        self.cpus[cpu].nesting += 1;
        self.stats.irqs += 1;
        trace!("CPU {}: IRQ {} (nesting {})", cpu, line, self.cpus[cpu].nesting);

        let handlers: Vec<InterruptId> = self.lines.get(line).cloned().unwrap_or_default();
        let mut status = IsrStatus::empty();
        for id in handlers {
            let (isr, cookie) = match self.interrupts.get(id) {
                Some(intr) if intr.attached => (intr.isr.clone(), intr.cookie),
                _ => continue,
            };
            let outcome = isr(self, id, cookie);
            if outcome.contains(IsrStatus::HANDLED) {
                if let Some(intr) = self.interrupts.get_mut(id) {
                    intr.hits += 1;
                }
            }
            status |= outcome;
        }

        if !status.contains(IsrStatus::HANDLED) {
            self.stats.spurious_irqs += 1;
            warn!("CPU {}: unhandled IRQ {}", cpu, line);
            status |= match self.config.unhandled_irq {
                UnhandledIrq::Propagate => IsrStatus::PROPAGATE,
                UnhandledIrq::Drop => IsrStatus::ENABLE,
            };
        }
        if status.contains(IsrStatus::ENABLE) {
            self.hal.irq_end(line);
        }
        if status.contains(IsrStatus::PROPAGATE) {
            self.hal.propagate_irq(line);
        }

        self.cpus[cpu].nesting -= 1;
        if self.cpus[cpu].nesting == 0 {
            self.schedule();
        }
    }

    /// Service routine of the clock interrupt.
    pub fn clock_interrupt(&mut self) -> IsrStatus {
        self.do_timers();
        IsrStatus::HANDLED | IsrStatus::ENABLE
    }

    /// Attach and unmask the clock interrupt on `line`.
    pub fn attach_clock(&mut self, line: usize) -> NucleusResult<InterruptId> {
        let id = self.intr_init(line, IntrFlags::empty(), 0, |pod, _, _| pod.clock_interrupt())?;
        if let Err(err) = self.intr_attach(id) {
            self.interrupts.remove(id);
            return Err(err);
        }
        self.intr_enable(id)?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::sim::HalEvent;
    use crate::arch::SimHal;
    use crate::config::NucleusConfig;

    fn pod(config: NucleusConfig) -> Pod<SimHal> {
        Pod::new(Arc::new(SimHal::new(1)), config).unwrap()
    }

    #[test]
    fn test_exclusive_line_is_busy() {
        let mut pod = pod(NucleusConfig::periodic(1));
        let a = pod
            .intr_init(5, IntrFlags::empty(), 0, |_, _, _| IsrStatus::HANDLED)
            .unwrap();
        let b = pod
            .intr_init(5, IntrFlags::SHARED, 0, |_, _, _| IsrStatus::HANDLED)
            .unwrap();
        pod.intr_attach(a).unwrap();
        pod.intr_attach(a).unwrap();
        assert_eq!(pod.intr_attach(b), Err(IrqError::Busy(5).into()));

        pod.intr_detach(a).unwrap();
        pod.intr_detach(a).unwrap();
        pod.intr_attach(b).unwrap();
    }

    #[test]
    fn test_line_out_of_range() {
        let mut pod = pod(NucleusConfig::periodic(1).irq_lines(16));
        let err = pod
            .intr_init(16, IntrFlags::empty(), 0, |_, _, _| IsrStatus::HANDLED)
            .err();
        assert_eq!(err, Some(ResourceError::LineOutOfRange(16).into()));
    }

    #[test]
    fn test_unhandled_policy() {
        let mut pod = pod(NucleusConfig::periodic(1));
        pod.dispatch_irq(9);
        let mut dropped = self::pod(NucleusConfig::periodic(1).unhandled_irq(UnhandledIrq::Drop));
        dropped.dispatch_irq(9);

        assert_eq!(pod.hal().events(), alloc::vec![HalEvent::IrqPropagated(9)]);
        assert_eq!(dropped.hal().events(), alloc::vec![HalEvent::IrqEnded(9)]);
        assert_eq!(pod.stats().spurious_irqs, 1);
    }

    #[test]
    fn test_routine_sees_cookie_and_nesting() {
        let mut pod = pod(NucleusConfig::periodic(1));
        let id = pod
            .intr_init(3, IntrFlags::empty(), 0xbeef, |pod, _, cookie| {
                assert_eq!(cookie, 0xbeef);
                assert!(pod.in_interrupt());
                IsrStatus::HANDLED | IsrStatus::ENABLE
            })
            .unwrap();
        pod.intr_attach(id).unwrap();
        pod.dispatch_irq(3);
        assert_eq!(pod.intr_hits(id).unwrap(), 1);
        assert!(!pod.in_interrupt());
        assert_eq!(pod.hal().events(), alloc::vec![HalEvent::IrqEnded(3)]);
    }
}
