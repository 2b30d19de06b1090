use core::fmt;

pub mod coff;
pub mod image;
pub mod loader;
pub mod process;
pub mod registers;
pub mod table;

/// Process identifier. Handed out in increasing order and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `Created -> Loaded -> Running -> Exited`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Descriptor table set up, nothing loaded.
    Created,
    /// Executable loaded, no execution context yet.
    Loaded,
    Running,
    Exited,
}
