//! The closed set of emulated-machine exceptions and their delivery
//! payload. These are architectural: they must be surfaced to the caller
//! as a result variant and never as a host-level failure.

use crate::pc::Pc;

/// Current privilege mode, used both for access checks and as the
/// parameter of a change-mode exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Mode {
    Kernel,
    Executive,
    Supervisor,
    User,
}

/// The closed set of architectural exceptions the core can raise. Faults
/// (`TranslationNotValid`, `FaultOnRead`, ...) re-execute the faulting
/// instruction on return; traps advance past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    FloatingDisabledFault,
    AccessControlViolation,
    TranslationNotValid,
    FaultOnRead,
    FaultOnWrite,
    FaultOnExecute,
    ArithmeticTrap,
    BreakpointTrap,
    BugcheckTrap,
    ChangeMode(Mode),
    IllegalInstruction,
    IllegalOperand,
    DataAlignmentTrap,
    Ast,
    IntervalClock,
    InterprocessorInterrupt,
    SoftwareInterrupt,
    PerformanceMonitor,
    PassiveRelease,
    Powerfail,
    IoDevice,
    ProcessorCorrectable,
    SystemCorrectable,
    System,
    Processor,
}

impl Exception {
    /// Faults are re-executed on return from the handler; everything else
    /// (traps and interrupts) resumes at the next instruction.
    #[must_use]
    pub fn is_fault(self) -> bool {
        matches!(
            self,
            Exception::TranslationNotValid
                | Exception::FaultOnRead
                | Exception::FaultOnWrite
                | Exception::FaultOnExecute
                | Exception::AccessControlViolation
        )
    }
}

/// The delivery payload for a raised exception: the saved PC plus the four
/// registers PALcode entry populates from the SCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub exception: Exception,
    pub saved_pc: Pc,
    /// R02: SCB vector.
    pub scb_vector: u64,
    /// R03: SCB parameter.
    pub scb_param: u64,
    pub r04: u64,
    pub r05: u64,
}

impl ExceptionInfo {
    #[must_use]
    pub fn new(exception: Exception, saved_pc: Pc) -> Self {
        Self { exception, saved_pc, scb_vector: 0, scb_param: 0, r04: 0, r05: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_not_valid_is_a_fault() {
        assert!(Exception::TranslationNotValid.is_fault());
        assert!(!Exception::BreakpointTrap.is_fault());
    }
}
