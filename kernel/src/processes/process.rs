use std::sync::Arc;

use futures::{channel::oneshot, executor::block_on};
use log::debug;
use spin::{Mutex, MutexGuard};

use crate::{
    devices::console::Console,
    filesys::descriptors::FileDescriptorTable,
    memory::{page_allocator::PageAllocator, physical::PhysicalMemory, translation::AddressSpace},
    processes::{coff::Executable, registers::Registers, Pid, ProcessState},
};

/// Where a loaded program sits in its address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramLayout {
    /// Section pages + stack pages + the argument page.
    pub num_pages: usize,
    pub entry_point: u32,
    /// Top of the stack region.
    pub initial_sp: u32,
    pub argc: i32,
    /// Virtual address of the argv pointer array.
    pub argv: u32,
}

impl ProgramLayout {
    pub fn initial_registers(&self) -> Registers {
        Registers::for_entry(self.entry_point, self.initial_sp, self.argc, self.argv)
    }
}

/// State only the process's own execution context (or the kernel acting on
/// its behalf) touches.
pub(crate) struct ProcessInner {
    pub(crate) state: ProcessState,
    pub(crate) address_space: AddressSpace,
    pub(crate) files: FileDescriptorTable,
    pub(crate) executable: Option<Box<dyn Executable>>,
    pub(crate) layout: Option<ProgramLayout>,
    pub(crate) exit_status: Option<i32>,
}

impl ProcessInner {
    /// Gives back every physical page and closes every file. Returns the
    /// number of pages released.
    pub(crate) fn release_resources(&mut self, pages: &PageAllocator) -> usize {
        let mapped = self.address_space.unmap_all();
        for &ppn in &mapped {
            pages.release_page(ppn);
        }
        self.files.close_all();
        if let Some(mut executable) = self.executable.take() {
            executable.close();
        }
        mapped.len()
    }
}

/// A child as seen from its parent: the process plus the receiving end of
/// its exit notification.
pub struct ChildProcess {
    process: Arc<UserProcess>,
    exited: oneshot::Receiver<Option<i32>>,
}

impl ChildProcess {
    pub fn pid(&self) -> Pid {
        self.process.pid()
    }

    pub fn process(&self) -> &Arc<UserProcess> {
        &self.process
    }

    /// Blocks until the child has finished and returns its exit status,
    /// `None` if it never called exit.
    pub fn wait(self) -> Option<i32> {
        block_on(self.exited).unwrap_or(None)
    }
}

pub struct UserProcess {
    pid: Pid,
    parent: Mutex<Option<Pid>>,
    inner: Mutex<ProcessInner>,
    children: Mutex<Vec<ChildProcess>>,
    exit_signal: Mutex<Option<oneshot::Sender<Option<i32>>>>,
    exit_watch: Mutex<Option<oneshot::Receiver<Option<i32>>>>,
}

impl UserProcess {
    /// Creates a process with an empty address space and the console open on
    /// descriptors 0 and 1.
    pub fn new(pid: Pid, console: &dyn Console) -> Self {
        let (exit_signal, exit_watch) = oneshot::channel();
        UserProcess {
            pid,
            parent: Mutex::new(None),
            inner: Mutex::new(ProcessInner {
                state: ProcessState::Created,
                address_space: AddressSpace::new(),
                files: FileDescriptorTable::with_console(
                    console.open_for_reading(),
                    console.open_for_writing(),
                ),
                executable: None,
                layout: None,
                exit_status: None,
            }),
            children: Mutex::new(Vec::new()),
            exit_signal: Mutex::new(Some(exit_signal)),
            exit_watch: Mutex::new(Some(exit_watch)),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Option<Pid> {
        *self.parent.lock()
    }

    pub(crate) fn set_parent(&self, parent: Option<Pid>) {
        *self.parent.lock() = parent;
    }

    pub fn state(&self) -> ProcessState {
        self.inner.lock().state
    }

    pub fn exit_status(&self) -> Option<i32> {
        self.inner.lock().exit_status
    }

    pub fn layout(&self) -> Option<ProgramLayout> {
        self.inner.lock().layout
    }

    /// Physical pages currently mapped for this process.
    pub fn page_count(&self) -> usize {
        self.inner.lock().address_space.mapped_pages().len()
    }

    pub fn mapped_pages(&self) -> Vec<usize> {
        self.inner.lock().address_space.mapped_pages()
    }

    pub fn open_file_count(&self) -> usize {
        self.inner.lock().files.open_count()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ProcessInner> {
        self.inner.lock()
    }

    pub fn read_virtual_memory(&self, memory: &PhysicalMemory, vaddr: i32, buf: &mut [u8]) -> usize {
        self.inner.lock().address_space.read(memory, vaddr, buf)
    }

    pub fn write_virtual_memory(&self, memory: &PhysicalMemory, vaddr: i32, data: &[u8]) -> usize {
        self.inner.lock().address_space.write(memory, vaddr, data)
    }

    pub fn read_virtual_memory_string(
        &self,
        memory: &PhysicalMemory,
        vaddr: i32,
        max_len: usize,
    ) -> Option<String> {
        self.inner
            .lock()
            .address_space
            .read_string(memory, vaddr, max_len)
    }

    /// Links `child` under this process. Panics if the child was already
    /// linked somewhere.
    pub(crate) fn adopt(&self, child: &Arc<UserProcess>) {
        let exited = child
            .exit_watch
            .lock()
            .take()
            .unwrap_or_else(|| panic!("process {} already has a parent", child.pid));
        child.set_parent(Some(self.pid));
        self.children.lock().push(ChildProcess {
            process: Arc::clone(child),
            exited,
        });
    }

    /// Unlinks and returns the live child `pid`.
    pub(crate) fn take_child(&self, pid: Pid) -> Option<ChildProcess> {
        let mut children = self.children.lock();
        let index = children.iter().position(|child| child.pid() == pid)?;
        let child = children.remove(index);
        child.process.set_parent(None);
        Some(child)
    }

    pub fn child_pids(&self) -> Vec<Pid> {
        self.children.lock().iter().map(ChildProcess::pid).collect()
    }

    /// Clears the parent link of every child and forgets them.
    pub(crate) fn detach_children(&self) -> usize {
        let children = core::mem::take(&mut *self.children.lock());
        for child in &children {
            child.process.set_parent(None);
        }
        children.len()
    }

    /// Wakes whoever is joining this process. Only the first call counts.
    pub(crate) fn signal_exit(&self, status: Option<i32>) {
        if let Some(signal) = self.exit_signal.lock().take() {
            // Nobody listening once the parent has gone away.
            let _ = signal.send(status);
        }
        debug!("process {} signalled exit ({:?})", self.pid, status);
    }
}

impl core::fmt::Debug for UserProcess {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserProcess")
            .field("pid", &self.pid)
            .field("parent", &self.parent())
            .field("children", &self.child_pids())
            .finish()
    }
}
