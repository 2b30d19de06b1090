//! Run-time kernel configuration.

use crate::constants::{memory::STACK_PAGES, processes::DEFAULT_SHELL_PROGRAM};

/// Knobs the embedding machine may override. The physical page count is not
/// here: it is whatever the machine's physical memory holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelConfig {
    /// Stack pages reserved for every loaded program.
    pub stack_pages: usize,
    /// Program the root process runs at boot.
    pub shell_program: String,
    pub shell_args: Vec<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelConfig {
    pub fn new() -> Self {
        KernelConfig {
            stack_pages: STACK_PAGES,
            shell_program: String::from(DEFAULT_SHELL_PROGRAM),
            shell_args: Vec::new(),
        }
    }

    pub fn with_stack_pages(mut self, stack_pages: usize) -> Self {
        self.stack_pages = stack_pages;
        self
    }

    pub fn with_shell(mut self, program: &str, args: &[&str]) -> Self {
        self.shell_program = String::from(program);
        self.shell_args = args.iter().map(|arg| String::from(*arg)).collect();
        self
    }
}
