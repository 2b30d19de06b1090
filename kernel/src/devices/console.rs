//! Console device handed to every process as descriptors 0 and 1.

use std::sync::Arc;

use crossbeam_queue::SegQueue;
use spin::Mutex;

use crate::filesys::{FsError, OpenFile};

/// Source of the two console streams each new process starts with.
pub trait Console: Send + Sync {
    fn open_for_reading(&self) -> Box<dyn OpenFile>;
    fn open_for_writing(&self) -> Box<dyn OpenFile>;
}

/// Console backed by in-memory buffers.
///
/// Typed input is queued with [`QueueConsole::push_input`]; reads never block
/// and return whatever is queued. Output accumulates until taken.
#[derive(Default)]
pub struct QueueConsole {
    input: Arc<SegQueue<u8>>,
    output: Arc<Mutex<Vec<u8>>>,
}

impl QueueConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_input(&self, bytes: &[u8]) {
        for &byte in bytes {
            self.input.push(byte);
        }
    }

    /// Drains everything written so far.
    pub fn take_output(&self) -> Vec<u8> {
        core::mem::take(&mut *self.output.lock())
    }
}

impl Console for QueueConsole {
    fn open_for_reading(&self) -> Box<dyn OpenFile> {
        Box::new(ConsoleReader {
            input: Arc::clone(&self.input),
        })
    }

    fn open_for_writing(&self) -> Box<dyn OpenFile> {
        Box::new(ConsoleWriter {
            output: Arc::clone(&self.output),
        })
    }
}

struct ConsoleReader {
    input: Arc<SegQueue<u8>>,
}

impl OpenFile for ConsoleReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let mut read = 0;
        while read < buf.len() {
            match self.input.pop() {
                Some(byte) => {
                    buf[read] = byte;
                    read += 1;
                }
                None => break,
            }
        }
        Ok(read)
    }

    fn write(&mut self, _buf: &[u8]) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    fn name(&self) -> &str {
        "console"
    }
}

struct ConsoleWriter {
    output: Arc<Mutex<Vec<u8>>>,
}

impl OpenFile for ConsoleWriter {
    fn read(&mut self, _buf: &mut [u8]) -> Result<usize, FsError> {
        Err(FsError::NotSupported)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        self.output.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn name(&self) -> &str {
        "console"
    }
}
