//! User-process runtime for a teaching kernel running on a simulated machine.
//!
//! The machine itself (CPU, physical memory array, console, executable
//! parser) is supplied from outside through the traits in [`machine`],
//! [`filesys`], [`devices`] and [`processes::coff`]. This crate owns what
//! sits between user programs and those devices: page allocation, address
//! translation, executable loading, the process lifecycle and the syscall
//! boundary.
#![cfg_attr(feature = "strict", deny(warnings))]

pub mod config;
pub mod constants;
pub mod devices;
pub mod filesys;
pub mod interrupts;
pub mod kernel;
pub mod logging;
pub mod machine;
pub mod memory;
pub mod processes;
pub mod syscalls;

#[cfg(test)]
mod test_support;

pub use config::KernelConfig;
pub use kernel::UserKernel;
pub use processes::Pid;

pub mod prelude {
    pub use crate::config::KernelConfig;
    pub use crate::devices::console::{Console, QueueConsole};
    pub use crate::filesys::{memory::MemFileSystem, FileSystem, FsError, OpenFile};
    pub use crate::kernel::{JoinOutcome, UserKernel};
    pub use crate::machine::Machine;
    pub use crate::memory::physical::PhysicalMemory;
    pub use crate::processes::{
        coff::{CoffSection, Executable, ExecutableFormat},
        image::{FlatImageFormat, ImageWriter},
        loader::LoadError,
        process::UserProcess,
        registers::Registers,
        Pid, ProcessState,
    };
    pub use crate::syscalls::SyscallOutcome;
}
