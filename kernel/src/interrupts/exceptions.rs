//! Traps out of user mode.

use std::sync::Arc;

use log::warn;

use crate::{
    constants::syscalls::{
        EXCEPTION_ADDRESS_ERROR, EXCEPTION_BUS_ERROR, EXCEPTION_ILLEGAL_INSTRUCTION,
        EXCEPTION_OVERFLOW, EXCEPTION_PAGE_FAULT, EXCEPTION_READ_ONLY, EXCEPTION_SYSCALL,
        EXCEPTION_TLB_MISS,
    },
    kernel::UserKernel,
    processes::{process::UserProcess, registers::Registers},
    syscalls::{syscall_handlers::dispatch_syscall, SyscallOutcome},
};

/// Exception causes the processor can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    Syscall,
    PageFault,
    TlbMiss,
    ReadOnly,
    BusError,
    AddressError,
    Overflow,
    IllegalInstruction,
}

impl Exception {
    /// Panics on a cause code the processor never raises.
    pub fn from_cause(cause: i32) -> Self {
        match cause {
            EXCEPTION_SYSCALL => Exception::Syscall,
            EXCEPTION_PAGE_FAULT => Exception::PageFault,
            EXCEPTION_TLB_MISS => Exception::TlbMiss,
            EXCEPTION_READ_ONLY => Exception::ReadOnly,
            EXCEPTION_BUS_ERROR => Exception::BusError,
            EXCEPTION_ADDRESS_ERROR => Exception::AddressError,
            EXCEPTION_OVERFLOW => Exception::Overflow,
            EXCEPTION_ILLEGAL_INSTRUCTION => Exception::IllegalInstruction,
            _ => panic!("Unknown exception cause: {}", cause),
        }
    }
}

/// Handles the trap described by `registers.cause` for `process`.
///
/// A syscall leaves its result in V0 and moves the PC past the trap
/// instruction. Anything else kills the process without an exit status.
pub fn handle_exception(
    kernel: &UserKernel,
    process: &Arc<UserProcess>,
    registers: &mut Registers,
) -> SyscallOutcome {
    match Exception::from_cause(registers.cause) {
        Exception::Syscall => {
            let (number, args) = registers.syscall_args();
            let outcome = dispatch_syscall(kernel, process, number, args);
            if let SyscallOutcome::Return(value) = outcome {
                registers.set_return(value);
                registers.advance_pc();
            }
            outcome
        }
        fault => {
            warn!(
                "Process {}: {:?} at pc {:#x} (bad vaddr {:#x})",
                process.pid(),
                fault,
                registers.pc,
                registers.bad_vaddr
            );
            kernel.terminate(process)
        }
    }
}
