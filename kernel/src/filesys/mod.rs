use core::fmt;

pub mod descriptors;
pub mod memory;

/// Errors reported by file system and descriptor table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    InvalidName,
    IOError,
    NotSupported,
    BadDescriptor,
    TooManyOpenFiles,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::NotFound => write!(f, "File not found"),
            FsError::AlreadyExists => write!(f, "File already exists"),
            FsError::InvalidName => write!(f, "Invalid file name"),
            FsError::IOError => write!(f, "I/O error"),
            FsError::NotSupported => write!(f, "Operation not supported"),
            FsError::BadDescriptor => write!(f, "Bad file descriptor"),
            FsError::TooManyOpenFiles => write!(f, "Descriptor table is full"),
        }
    }
}

/// An open file, console stream or other byte stream handed to a process.
pub trait OpenFile: Send {
    /// Reads up to `buf.len()` bytes at the current position.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;

    /// Writes up to `buf.len()` bytes at the current position.
    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError>;

    fn close(&mut self) {}

    /// Name the file was opened under.
    fn name(&self) -> &str;
}

/// The file system the kernel stores programs and user files in.
pub trait FileSystem: Send + Sync {
    /// Opens `name`, creating an empty file first when `create` is set.
    fn open(&self, name: &str, create: bool) -> Result<Box<dyn OpenFile>, FsError>;

    fn remove(&self, name: &str) -> Result<(), FsError>;
}

/// Reads `file` from its current position to the end.
pub fn read_to_end(file: &mut dyn OpenFile) -> Result<Vec<u8>, FsError> {
    let mut contents = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            return Ok(contents);
        }
        contents.extend_from_slice(&chunk[..read]);
    }
}
