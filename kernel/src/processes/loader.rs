//! Executable loader.
//!
//! Turns a program file into a populated address space:
//!
//! 1. Open and parse the file through the configured [`ExecutableFormat`]
//! 2. Check the sections cover virtual pages `0..n` with no holes
//! 3. Marshal the arguments into one page worth of bytes
//! 4. Check enough physical pages are free, before granting any
//! 5. Grant one page per section page and copy it in, file order
//! 6. Grant zeroed stack pages and the argument page, then copy the
//!    argument block into the last page
//!
//! Any failure after step 1 closes the executable; any failure after
//! step 4 also returns every page granted so far.

use core::fmt;

use arrayvec::ArrayVec;
use log::debug;

use crate::{
    constants::{memory::PAGE_SIZE, processes::ARGV_POINTER_SIZE},
    filesys::{FileSystem, FsError},
    memory::{page_allocator::PageAllocator, physical::PhysicalMemory, translation::AddressSpace},
    processes::{
        coff::{Executable, ExecutableFormat},
        process::{ProcessInner, ProgramLayout},
        ProcessState,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// The program file does not exist.
    NotFound,
    /// The file is not a valid executable.
    Malformed,
    /// Sections do not cover virtual pages contiguously from 0.
    Fragmented,
    /// Argument pointers and strings do not fit in one page.
    ArgumentsTooLong,
    /// The program needs more pages than the machine has free.
    InsufficientMemory,
    /// A page grant failed part way through loading.
    OutOfPages,
    /// The process already has a program loaded.
    AlreadyLoaded,
    Io(FsError),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NotFound => write!(f, "Executable not found"),
            LoadError::Malformed => write!(f, "Malformed executable"),
            LoadError::Fragmented => write!(f, "Fragmented executable"),
            LoadError::ArgumentsTooLong => write!(f, "Arguments too long"),
            LoadError::InsufficientMemory => write!(f, "Insufficient physical memory"),
            LoadError::OutOfPages => write!(f, "Ran out of physical pages"),
            LoadError::AlreadyLoaded => write!(f, "Process already loaded"),
            LoadError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl From<FsError> for LoadError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::NotFound => LoadError::NotFound,
            other => LoadError::Io(other),
        }
    }
}

/// The argument page: `argc` little-endian pointers followed by the
/// NUL-terminated strings they point at.
pub type ArgumentBlock = ArrayVec<u8, PAGE_SIZE>;

/// Lays out `args` for a block that will sit at virtual address `base`.
pub fn marshal_arguments(args: &[String], base: u32) -> Result<ArgumentBlock, LoadError> {
    let pointers = args.len() * ARGV_POINTER_SIZE;
    let strings: usize = args.iter().map(|arg| arg.len() + 1).sum();
    if pointers + strings > PAGE_SIZE {
        return Err(LoadError::ArgumentsTooLong);
    }

    let mut block = ArgumentBlock::new();
    let mut offset = base
        .checked_add(pointers as u32)
        .ok_or(LoadError::Malformed)?;
    for arg in args {
        block
            .try_extend_from_slice(&offset.to_le_bytes())
            .map_err(|_| LoadError::ArgumentsTooLong)?;
        offset = offset
            .checked_add(arg.len() as u32 + 1)
            .ok_or(LoadError::Malformed)?;
    }
    for arg in args {
        block
            .try_extend_from_slice(arg.as_bytes())
            .map_err(|_| LoadError::ArgumentsTooLong)?;
        block.try_push(0).map_err(|_| LoadError::ArgumentsTooLong)?;
    }
    Ok(block)
}

/// Everything a load needs from the kernel.
pub struct Loader<'a> {
    pub memory: &'a PhysicalMemory,
    pub pages: &'a PageAllocator,
    pub file_system: &'a dyn FileSystem,
    pub format: &'a dyn ExecutableFormat,
    pub stack_pages: usize,
}

impl Loader<'_> {
    /// Loads `name` into a freshly created process.
    ///
    /// On success the process is `Loaded` and owns the executable and every
    /// granted page. On failure nothing about the process or the allocator
    /// has changed.
    pub(crate) fn load(
        &self,
        process: &mut ProcessInner,
        name: &str,
        args: &[String],
    ) -> Result<ProgramLayout, LoadError> {
        if process.state != ProcessState::Created {
            return Err(LoadError::AlreadyLoaded);
        }

        let file = self.file_system.open(name, false)?;
        let mut executable = self.format.parse(file)?;

        match self.populate(executable.as_mut(), args) {
            Ok((address_space, layout)) => {
                debug!(
                    "loaded {} ({} pages, entry {:#x})",
                    name, layout.num_pages, layout.entry_point
                );
                process.address_space = address_space;
                process.executable = Some(executable);
                process.layout = Some(layout);
                process.state = ProcessState::Loaded;
                Ok(layout)
            }
            Err(err) => {
                debug!("failed to load {}: {}", name, err);
                executable.close();
                Err(err)
            }
        }
    }

    fn populate(
        &self,
        executable: &mut dyn Executable,
        args: &[String],
    ) -> Result<(AddressSpace, ProgramLayout), LoadError> {
        let mut section_pages = 0;
        for section in executable.sections() {
            if section.first_vpn != section_pages {
                debug!(
                    "section {} starts at page {}, expected {}",
                    section.name, section.first_vpn, section_pages
                );
                return Err(LoadError::Fragmented);
            }
            section_pages += section.length;
        }

        let stack_top = section_pages + self.stack_pages;
        let num_pages = stack_top + 1;
        if num_pages > self.pages.total_pages() || num_pages > self.pages.free_pages() {
            debug!(
                "need {} pages, {} of {} free",
                num_pages,
                self.pages.free_pages(),
                self.pages.total_pages()
            );
            return Err(LoadError::InsufficientMemory);
        }

        let argv = u32::try_from(stack_top * PAGE_SIZE).map_err(|_| LoadError::Malformed)?;
        let arguments = marshal_arguments(args, argv)?;

        let mut address_space = AddressSpace::new();
        if let Err(err) = self.map_pages(&mut address_space, executable, stack_top, &arguments) {
            for ppn in address_space.unmap_all() {
                self.pages.release_page(ppn);
            }
            return Err(err);
        }

        let layout = ProgramLayout {
            num_pages,
            entry_point: executable.entry_point(),
            initial_sp: argv,
            argc: args.len() as i32,
            argv,
        };
        Ok((address_space, layout))
    }

    /// Grants and fills every page: sections, then stack, then the argument
    /// page at `stack_top`.
    fn map_pages(
        &self,
        address_space: &mut AddressSpace,
        executable: &mut dyn Executable,
        stack_top: usize,
        arguments: &[u8],
    ) -> Result<(), LoadError> {
        let sections = executable.sections().to_vec();
        for (index, section) in sections.iter().enumerate() {
            debug!(
                "loading section {} ({} pages{})",
                section.name,
                section.length,
                if section.read_only { ", read-only" } else { "" }
            );
            for page in 0..section.length {
                let ppn = self.pages.acquire_page().ok_or(LoadError::OutOfPages)?;
                address_space.map(section.first_vpn + page, ppn, section.read_only);
                executable.load_page(index, page, ppn, self.memory)?;
            }
        }

        let first_stack_page = stack_top - self.stack_pages;
        for vpn in first_stack_page..=stack_top {
            let ppn = self.pages.acquire_page().ok_or(LoadError::OutOfPages)?;
            address_space.map(vpn, ppn, false);
            self.memory.zero_page(ppn);
            if vpn == stack_top {
                self.memory.write(ppn * PAGE_SIZE, arguments);
            }
        }
        Ok(())
    }
}
