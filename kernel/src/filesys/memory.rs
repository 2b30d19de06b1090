//! In-memory file system

use std::{collections::BTreeMap, sync::Arc};

use spin::{Mutex, RwLock};

use crate::filesys::{FileSystem, FsError, OpenFile};

type FileData = Arc<Mutex<Vec<u8>>>;

/// File system that keeps every file in memory.
///
/// Removing a file only drops its directory entry: handles that are already
/// open keep reading and writing the old contents.
#[derive(Default)]
pub struct MemFileSystem {
    files: RwLock<BTreeMap<String, FileData>>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces `name` with `contents`.
    pub fn insert(&self, name: &str, contents: &[u8]) {
        self.files
            .write()
            .insert(String::from(name), Arc::new(Mutex::new(contents.to_vec())));
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files.read().get(name).map(|data| data.lock().clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }

    /// Validates file name
    fn validate_name(name: &str) -> Result<(), FsError> {
        if name.is_empty() || name.contains('\0') {
            return Err(FsError::InvalidName);
        }
        Ok(())
    }
}

impl FileSystem for MemFileSystem {
    fn open(&self, name: &str, create: bool) -> Result<Box<dyn OpenFile>, FsError> {
        Self::validate_name(name)?;

        let data = if create {
            let mut files = self.files.write();
            Arc::clone(
                files
                    .entry(String::from(name))
                    .or_insert_with(|| Arc::new(Mutex::new(Vec::new()))),
            )
        } else {
            self.files
                .read()
                .get(name)
                .map(Arc::clone)
                .ok_or(FsError::NotFound)?
        };

        Ok(Box::new(MemFile {
            name: String::from(name),
            data,
            position: 0,
            open: true,
        }))
    }

    fn remove(&self, name: &str) -> Result<(), FsError> {
        self.files
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or(FsError::NotFound)
    }
}

/// Handle on a [`MemFileSystem`] file with its own position.
struct MemFile {
    name: String,
    data: FileData,
    position: usize,
    open: bool,
}

impl OpenFile for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if !self.open {
            return Err(FsError::BadDescriptor);
        }
        let data = self.data.lock();
        if self.position >= data.len() {
            return Ok(0);
        }
        let amount = buf.len().min(data.len() - self.position);
        buf[..amount].copy_from_slice(&data[self.position..self.position + amount]);
        self.position += amount;
        Ok(amount)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if !self.open {
            return Err(FsError::BadDescriptor);
        }
        let mut data = self.data.lock();
        let end = self.position + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[self.position..end].copy_from_slice(buf);
        self.position = end;
        Ok(buf.len())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn name(&self) -> &str {
        &self.name
    }
}
