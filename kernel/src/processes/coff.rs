//! Interface to the executable parser.
//!
//! The kernel never decodes program files itself: an [`ExecutableFormat`]
//! turns an open file into an [`Executable`] that describes its sections and
//! can copy them into physical pages.

use crate::{filesys::OpenFile, memory::physical::PhysicalMemory, processes::loader::LoadError};

/// Layout of one loadable section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoffSection {
    pub name: String,
    pub first_vpn: usize,
    /// Length in pages.
    pub length: usize,
    pub read_only: bool,
}

pub trait Executable: Send {
    fn sections(&self) -> &[CoffSection];

    /// Virtual address of the first instruction.
    fn entry_point(&self) -> u32;

    /// Copies page `page` of section `section` into physical page `ppn`.
    fn load_page(
        &mut self,
        section: usize,
        page: usize,
        ppn: usize,
        memory: &PhysicalMemory,
    ) -> Result<(), LoadError>;

    /// Closes the underlying file.
    fn close(&mut self);
}

pub trait ExecutableFormat: Send + Sync {
    /// Takes ownership of `file`; on error the file has already been closed.
    fn parse(&self, file: Box<dyn OpenFile>) -> Result<Box<dyn Executable>, LoadError>;
}
