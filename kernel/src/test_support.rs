//! Simulated machine and fixtures shared by the unit tests.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use bytes::Bytes;
use spin::Mutex;

use crate::{
    config::KernelConfig,
    constants::memory::PAGE_SIZE,
    devices::console::QueueConsole,
    filesys::memory::MemFileSystem,
    kernel::UserKernel,
    machine::Machine,
    memory::physical::PhysicalMemory,
    processes::{
        image::{FlatImageFormat, ImageWriter},
        process::UserProcess,
        registers::Registers,
        Pid,
    },
};

/// Machine that records what the kernel asks of it instead of running
/// anything.
pub struct TestMachine {
    memory: PhysicalMemory,
    halted: AtomicBool,
    started: Mutex<Vec<(Pid, Registers)>>,
    pub console: Arc<QueueConsole>,
    pub fs: Arc<MemFileSystem>,
}

impl TestMachine {
    pub fn new(num_pages: usize) -> Self {
        TestMachine {
            memory: PhysicalMemory::new(num_pages),
            halted: AtomicBool::new(false),
            started: Mutex::new(Vec::new()),
            console: Arc::new(QueueConsole::new()),
            fs: Arc::new(MemFileSystem::new()),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Every context started so far, oldest first.
    pub fn started(&self) -> Vec<(Pid, Registers)> {
        self.started.lock().clone()
    }
}

impl Machine for TestMachine {
    fn physical_memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
    }

    fn start_context(&self, process: Arc<UserProcess>, registers: Registers) {
        self.started.lock().push((process.pid(), registers));
    }
}

/// One read-only text page and one writable data page.
pub fn program_image() -> Bytes {
    ImageWriter::new(0x40)
        .section(".text", 0, 1, true, &[0x24, 0x02, 0x00, 0x01])
        .section(".data", 1, 1, false, b"data")
        .finish()
}

/// Kernel over a fresh [`TestMachine`] with `sh.coff` and `echo.coff`
/// installed.
pub fn test_kernel(num_pages: usize) -> (Arc<UserKernel>, Arc<TestMachine>) {
    let machine = Arc::new(TestMachine::new(num_pages));
    machine.fs.insert("sh.coff", &program_image());
    machine.fs.insert("echo.coff", &program_image());

    let kernel = UserKernel::new(
        KernelConfig::new(),
        machine.clone(),
        machine.fs.clone(),
        machine.console.clone(),
        Arc::new(FlatImageFormat),
    );
    (kernel, machine)
}

/// Kernel whose root shell is already running.
pub fn booted_kernel() -> (Arc<UserKernel>, Arc<TestMachine>, Arc<UserProcess>) {
    let (kernel, machine) = test_kernel(64);
    let pid = kernel.run().unwrap();
    let root = kernel.process(pid).unwrap();
    (kernel, machine, root)
}

/// Bump allocator over a process's stack pages, for staging syscall
/// arguments in user memory.
pub struct Scratch<'a> {
    kernel: &'a UserKernel,
    process: &'a UserProcess,
    next: i32,
}

impl<'a> Scratch<'a> {
    pub fn new(kernel: &'a UserKernel, process: &'a UserProcess) -> Self {
        let layout = process.layout().unwrap();
        let stack_base = layout.initial_sp as usize - kernel.config().stack_pages * PAGE_SIZE;
        Scratch {
            kernel,
            process,
            next: stack_base as i32,
        }
    }

    pub fn alloc(&mut self, len: usize) -> i32 {
        let addr = self.next;
        self.next += ((len + 3) & !3) as i32;
        addr
    }

    /// Copies `s` and a NUL terminator into user memory.
    pub fn string(&mut self, s: &str) -> i32 {
        let addr = self.alloc(s.len() + 1);
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        assert_eq!(
            self.kernel.write_virtual_memory(self.process, addr, &bytes),
            bytes.len()
        );
        addr
    }

    /// Stores `pointers` as an array of little-endian words.
    pub fn pointers(&mut self, pointers: &[i32]) -> i32 {
        let bytes: Vec<u8> = pointers.iter().flat_map(|p| p.to_le_bytes()).collect();
        let addr = self.alloc(bytes.len());
        assert_eq!(
            self.kernel.write_virtual_memory(self.process, addr, &bytes),
            bytes.len()
        );
        addr
    }
}
