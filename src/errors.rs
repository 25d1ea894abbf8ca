//! Error handling for nucleus operations.
//!
//! Every failure is returned synchronously to the caller. The nucleus never
//! retries on its own; re-waiting after a timeout or a forced break is up to
//! the personality layer sitting on top.
//!
//! Internal invariant violations are not errors: they go through [`fatal!`]
//! and halt.

#![allow(clippy::uninlined_format_args)]

use core::fmt;

/// Result type for nucleus operations.
pub type NucleusResult<T> = Result<T, NucleusError>;

/// Error type for all nucleus operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NucleusError {
    /// A handle does not name a live object of the expected kind
    InvalidHandle(HandleKind),
    /// Invalid argument, state or calling context
    InvalidOperation(InvalidOperationError),
    /// A wait did not complete normally
    Wait(WaitError),
    /// An object table or line range is exhausted
    Resource(ResourceError),
    /// Interrupt line errors
    Irq(IrqError),
}

/// Kind of object a handle was expected to name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Thread,
    Synch,
    Timer,
    Interrupt,
}

/// Invalid argument or wrong-state errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidOperationError {
    /// CPU does not exist
    InvalidCpu(usize),
    /// Object is not in a state that allows the operation
    WrongState,
    /// Blocking call from interrupt context or with no running thread
    WrongContext,
    /// Thread has no periodic timeline
    NotPeriodic,
    /// Caller does not own the synchronization object
    NotOwner,
    /// Object does not support the requested protocol
    NotSupported,
    /// Period or interval of zero
    ZeroInterval,
}

/// Reasons a wait ended without the resource being granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// The object was destroyed while the thread waited on it
    Removed,
    /// The timeout elapsed
    TimedOut,
    /// The wait was forcibly broken
    Broken,
}

/// Resource exhaustion errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    TooManyThreads,
    TooManyTimers,
    TooManySynchs,
    TooManyInterrupts,
    /// IRQ line number beyond the dispatcher table
    LineOutOfRange(usize),
}

/// Interrupt attachment errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqError {
    /// Line already carries a non-shared handler, or sharing was not requested
    Busy(usize),
}

impl fmt::Display for NucleusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NucleusError::InvalidHandle(kind) => write!(f, "Invalid {} handle", kind),
            NucleusError::InvalidOperation(e) => write!(f, "Invalid operation: {}", e),
            NucleusError::Wait(e) => write!(f, "Wait failed: {}", e),
            NucleusError::Resource(e) => write!(f, "Resource error: {}", e),
            NucleusError::Irq(e) => write!(f, "Interrupt error: {}", e),
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleKind::Thread => write!(f, "thread"),
            HandleKind::Synch => write!(f, "synchronization object"),
            HandleKind::Timer => write!(f, "timer"),
            HandleKind::Interrupt => write!(f, "interrupt"),
        }
    }
}

impl fmt::Display for InvalidOperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidOperationError::InvalidCpu(cpu) => write!(f, "Invalid CPU ID: {}", cpu),
            InvalidOperationError::WrongState => write!(f, "Operation called in wrong state"),
            InvalidOperationError::WrongContext => write!(f, "Blocking call outside of thread context"),
            InvalidOperationError::NotPeriodic => write!(f, "Thread is not periodic"),
            InvalidOperationError::NotOwner => write!(f, "Caller does not own the object"),
            InvalidOperationError::NotSupported => write!(f, "Operation not supported by this object"),
            InvalidOperationError::ZeroInterval => write!(f, "Interval must be non-zero"),
        }
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitError::Removed => write!(f, "Object removed while waiting"),
            WaitError::TimedOut => write!(f, "Wait timed out"),
            WaitError::Broken => write!(f, "Wait forcibly broken"),
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::TooManyThreads => write!(f, "Maximum number of threads reached"),
            ResourceError::TooManyTimers => write!(f, "Maximum number of timers reached"),
            ResourceError::TooManySynchs => write!(f, "Maximum number of synchronization objects reached"),
            ResourceError::TooManyInterrupts => write!(f, "Maximum number of interrupt objects reached"),
            ResourceError::LineOutOfRange(line) => write!(f, "IRQ line out of range: {}", line),
        }
    }
}

impl fmt::Display for IrqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrqError::Busy(line) => write!(f, "IRQ line {} is busy", line),
        }
    }
}

// Conversion implementations for ergonomic error handling

impl From<InvalidOperationError> for NucleusError {
    fn from(error: InvalidOperationError) -> Self {
        NucleusError::InvalidOperation(error)
    }
}

impl From<WaitError> for NucleusError {
    fn from(error: WaitError) -> Self {
        NucleusError::Wait(error)
    }
}

impl From<ResourceError> for NucleusError {
    fn from(error: ResourceError) -> Self {
        NucleusError::Resource(error)
    }
}

impl From<IrqError> for NucleusError {
    fn from(error: IrqError) -> Self {
        NucleusError::Irq(error)
    }
}

// Convenience constructors for common error patterns
impl NucleusError {
    pub fn bad_thread() -> Self {
        NucleusError::InvalidHandle(HandleKind::Thread)
    }

    pub fn bad_synch() -> Self {
        NucleusError::InvalidHandle(HandleKind::Synch)
    }

    pub fn bad_timer() -> Self {
        NucleusError::InvalidHandle(HandleKind::Timer)
    }

    pub fn bad_interrupt() -> Self {
        NucleusError::InvalidHandle(HandleKind::Interrupt)
    }

    pub fn wrong_state() -> Self {
        NucleusError::InvalidOperation(InvalidOperationError::WrongState)
    }

    pub fn wrong_context() -> Self {
        NucleusError::InvalidOperation(InvalidOperationError::WrongContext)
    }
}

/// Report an internal invariant violation and halt.
///
/// Continuing with a corrupted scheduler state is never attempted.
macro_rules! fatal {
    ($($arg:tt)*) => {{
        log::error!($($arg)*);
        panic!($($arg)*)
    }};
}

pub(crate) use fatal;

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            NucleusError::bad_timer().to_string(),
            "Invalid timer handle"
        );
        assert_eq!(
            NucleusError::from(WaitError::TimedOut).to_string(),
            "Wait failed: Wait timed out"
        );
        assert_eq!(
            NucleusError::from(IrqError::Busy(7)).to_string(),
            "Interrupt error: IRQ line 7 is busy"
        );
    }

    #[test]
    fn test_conversions() {
        let err: NucleusError = ResourceError::LineOutOfRange(300).into();
        assert_eq!(err, NucleusError::Resource(ResourceError::LineOutOfRange(300)));
        let err: NucleusError = InvalidOperationError::InvalidCpu(3).into();
        assert_eq!(err, NucleusError::InvalidOperation(InvalidOperationError::InvalidCpu(3)));
    }
}
