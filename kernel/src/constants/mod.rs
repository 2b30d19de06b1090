//! System-wide constants and machine-specific values.

pub mod memory;
pub mod processes;
pub mod syscalls;
