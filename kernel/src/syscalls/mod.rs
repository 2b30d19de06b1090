use crate::constants::syscalls::{
    SYSCALL_CLOSE, SYSCALL_CREATE, SYSCALL_EXEC, SYSCALL_EXIT, SYSCALL_HALT, SYSCALL_JOIN,
    SYSCALL_OPEN, SYSCALL_READ, SYSCALL_UNLINK, SYSCALL_WRITE,
};

pub mod syscall_handlers;

/// What the execution context does after a trap has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Resume user code with this value in the return register.
    Return(i32),
    /// The process is gone; the context must stop.
    Exited,
    /// The machine was powered off.
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt,
    Exit,
    Exec,
    Join,
    Create,
    Open,
    Read,
    Write,
    Close,
    Unlink,
}

impl TryFrom<i32> for Syscall {
    type Error = i32;

    fn try_from(number: i32) -> Result<Self, Self::Error> {
        match number {
            SYSCALL_HALT => Ok(Syscall::Halt),
            SYSCALL_EXIT => Ok(Syscall::Exit),
            SYSCALL_EXEC => Ok(Syscall::Exec),
            SYSCALL_JOIN => Ok(Syscall::Join),
            SYSCALL_CREATE => Ok(Syscall::Create),
            SYSCALL_OPEN => Ok(Syscall::Open),
            SYSCALL_READ => Ok(Syscall::Read),
            SYSCALL_WRITE => Ok(Syscall::Write),
            SYSCALL_CLOSE => Ok(Syscall::Close),
            SYSCALL_UNLINK => Ok(Syscall::Unlink),
            other => Err(other),
        }
    }
}
