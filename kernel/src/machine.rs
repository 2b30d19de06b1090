//! What the kernel needs from the simulated machine underneath it.

use std::sync::Arc;

use crate::{
    memory::physical::PhysicalMemory,
    processes::{process::UserProcess, registers::Registers},
};

pub trait Machine: Send + Sync {
    /// Main memory. Its page count bounds every allocation the kernel makes.
    fn physical_memory(&self) -> &PhysicalMemory;

    /// Powers the machine down.
    fn halt(&self);

    /// Starts a new execution context running `process` in user mode with
    /// the given initial register file. The context hands control back to
    /// the kernel through [`crate::UserKernel::handle_exception`].
    fn start_context(&self, process: Arc<UserProcess>, registers: Registers);
}
