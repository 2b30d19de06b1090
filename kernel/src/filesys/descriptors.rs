//! Per-process table of open files.

use log::debug;

use crate::{
    constants::processes::{MAX_OPEN_FILES, STDIN_FD, STDOUT_FD},
    filesys::{FsError, OpenFile},
};

/// Fixed-capacity map from small integers to open files.
///
/// A slot is either occupied by a handle or free; a slot only becomes free
/// again through [`FileDescriptorTable::close`] or [`FileDescriptorTable::close_all`].
pub struct FileDescriptorTable {
    files: [Option<Box<dyn OpenFile>>; MAX_OPEN_FILES],
}

impl Default for FileDescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileDescriptorTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        FileDescriptorTable {
            files: core::array::from_fn(|_| None),
        }
    }

    /// Creates a table with the console wired to descriptors 0 and 1.
    pub fn with_console(stdin: Box<dyn OpenFile>, stdout: Box<dyn OpenFile>) -> Self {
        let mut table = Self::new();
        table.files[STDIN_FD] = Some(stdin);
        table.files[STDOUT_FD] = Some(stdout);
        table
    }

    pub const fn capacity(&self) -> usize {
        MAX_OPEN_FILES
    }

    /// Converts a user-supplied descriptor into a slot index.
    fn index(fd: i32) -> Result<usize, FsError> {
        usize::try_from(fd)
            .ok()
            .filter(|&fd| fd < MAX_OPEN_FILES)
            .ok_or(FsError::BadDescriptor)
    }

    /// Gets an open file by descriptor.
    pub fn get_mut(&mut self, fd: i32) -> Result<&mut (dyn OpenFile + 'static), FsError> {
        let index = Self::index(fd)?;
        self.files[index]
            .as_deref_mut()
            .ok_or(FsError::BadDescriptor)
    }

    pub fn is_open(&self, fd: i32) -> bool {
        Self::index(fd)
            .map(|index| self.files[index].is_some())
            .unwrap_or(false)
    }

    /// Lowest free slot at or above `lowest`.
    pub fn free_slot(&self, lowest: usize) -> Option<usize> {
        (lowest..MAX_OPEN_FILES).find(|&fd| self.files[fd].is_none())
    }

    /// Places `handle` in the lowest free slot at or above `lowest`.
    ///
    /// On a full table the handle is closed and dropped.
    pub fn allocate(&mut self, mut handle: Box<dyn OpenFile>, lowest: usize) -> Result<usize, FsError> {
        match self.free_slot(lowest) {
            Some(fd) => {
                self.files[fd] = Some(handle);
                Ok(fd)
            }
            None => {
                handle.close();
                Err(FsError::TooManyOpenFiles)
            }
        }
    }

    /// Closes a file descriptor and frees its slot.
    pub fn close(&mut self, fd: i32) -> Result<(), FsError> {
        let index = Self::index(fd)?;
        let mut handle = self.files[index].take().ok_or(FsError::BadDescriptor)?;
        handle.close();
        Ok(())
    }

    /// Closes every open descriptor, console included. Returns how many were open.
    pub fn close_all(&mut self) -> usize {
        let mut closed = 0;
        for (fd, slot) in self.files.iter_mut().enumerate() {
            if let Some(mut handle) = slot.take() {
                debug!("closing fd {} ({})", fd, handle.name());
                handle.close();
                closed += 1;
            }
        }
        closed
    }

    /// True if any open descriptor refers to a file called `name`.
    pub fn is_open_named(&self, name: &str) -> bool {
        self.files.iter().flatten().any(|handle| handle.name() == name)
    }

    pub fn open_count(&self) -> usize {
        self.files.iter().flatten().count()
    }
}
