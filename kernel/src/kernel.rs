//! The kernel object: owns every piece of shared state and drives the
//! process lifecycle.
//!
//! Several kernels can coexist in one program; nothing here is global.

use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    config::KernelConfig,
    devices::console::Console,
    filesys::FileSystem,
    interrupts::exceptions,
    machine::Machine,
    memory::{page_allocator::PageAllocator, physical::PhysicalMemory},
    processes::{
        coff::ExecutableFormat,
        loader::{LoadError, Loader},
        process::UserProcess,
        registers::Registers,
        table::ProcessTable,
        Pid, ProcessState,
    },
    syscalls::SyscallOutcome,
};

/// Result of joining a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The pid is not a live child of the caller. Never blocks.
    NotAChild,
    /// The child finished. `None` if it never called exit.
    Joined(Option<i32>),
}

pub struct UserKernel {
    config: KernelConfig,
    machine: Arc<dyn Machine>,
    pages: PageAllocator,
    file_system: Arc<dyn FileSystem>,
    console: Arc<dyn Console>,
    format: Arc<dyn ExecutableFormat>,
    processes: ProcessTable,
}

impl UserKernel {
    pub fn new(
        config: KernelConfig,
        machine: Arc<dyn Machine>,
        file_system: Arc<dyn FileSystem>,
        console: Arc<dyn Console>,
        format: Arc<dyn ExecutableFormat>,
    ) -> Arc<Self> {
        let total_pages = machine.physical_memory().num_pages();
        info!(
            "Kernel up: {} physical pages of {} bytes",
            total_pages,
            crate::constants::memory::PAGE_SIZE
        );
        Arc::new(UserKernel {
            config,
            pages: PageAllocator::new(total_pages),
            machine,
            file_system,
            console,
            format,
            processes: ProcessTable::new(),
        })
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn memory(&self) -> &PhysicalMemory {
        self.machine.physical_memory()
    }

    pub fn pages(&self) -> &PageAllocator {
        &self.pages
    }

    pub fn free_pages(&self) -> usize {
        self.pages.free_pages()
    }

    pub fn file_system(&self) -> &dyn FileSystem {
        self.file_system.as_ref()
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn process(&self, pid: Pid) -> Option<Arc<UserProcess>> {
        self.processes.get(pid)
    }

    /// Boots the root process running the configured shell.
    pub fn run(&self) -> Result<Pid, LoadError> {
        let root = self.new_process();
        self.processes.set_root(root.pid());

        let program = self.config.shell_program.clone();
        let args = self.config.shell_args.clone();
        match self.execute(&root, &program, &args) {
            Ok(()) => Ok(root.pid()),
            Err(err) => {
                warn!("Failed to start {}: {}", program, err);
                self.discard(&root);
                Err(err)
            }
        }
    }

    /// Creates a process with the console open and nothing loaded.
    pub fn new_process(&self) -> Arc<UserProcess> {
        let pid = self.processes.allocate_pid();
        let process = Arc::new(UserProcess::new(pid, self.console.as_ref()));
        self.processes.insert(Arc::clone(&process));
        debug!("Created process {}", pid);
        process
    }

    fn loader(&self) -> Loader<'_> {
        Loader {
            memory: self.memory(),
            pages: &self.pages,
            file_system: self.file_system.as_ref(),
            format: self.format.as_ref(),
            stack_pages: self.config.stack_pages,
        }
    }

    /// Loads `name` into `process` and starts an execution context for it.
    pub fn execute(
        &self,
        process: &Arc<UserProcess>,
        name: &str,
        args: &[String],
    ) -> Result<(), LoadError> {
        let layout = {
            let mut inner = process.lock();
            let layout = self.loader().load(&mut inner, name, args)?;
            inner.state = ProcessState::Running;
            layout
        };

        let running = self.processes.mark_running();
        info!(
            "Process {} running {} ({} running)",
            process.pid(),
            name,
            running
        );
        self.machine
            .start_context(Arc::clone(process), layout.initial_registers());
        Ok(())
    }

    /// Creates a child of `parent` running `name`. On failure the child is
    /// discarded and never shows up in the parent's children.
    pub fn spawn(
        &self,
        parent: &Arc<UserProcess>,
        name: &str,
        args: &[String],
    ) -> Result<Pid, LoadError> {
        let child = self.new_process();
        parent.adopt(&child);

        match self.execute(&child, name, args) {
            Ok(()) => Ok(child.pid()),
            Err(err) => {
                debug!("Process {} failed to spawn {}: {}", parent.pid(), name, err);
                parent.take_child(child.pid());
                self.discard(&child);
                Err(err)
            }
        }
    }

    /// Throws away a process that never ran.
    pub fn discard(&self, process: &Arc<UserProcess>) {
        {
            let mut inner = process.lock();
            inner.release_resources(&self.pages);
            inner.state = ProcessState::Exited;
        }
        process.signal_exit(None);
        self.processes.remove(process.pid());
    }

    /// `process` called exit. The caller's execution context must not
    /// return to user code afterwards.
    pub fn exit(&self, process: &Arc<UserProcess>, status: i32) -> SyscallOutcome {
        info!("Process {} exit({})", process.pid(), status);
        self.finish(process, Some(status))
    }

    /// Ends `process` without an exit status, after a fault.
    pub fn terminate(&self, process: &Arc<UserProcess>) -> SyscallOutcome {
        warn!("Process {} terminated abnormally", process.pid());
        self.finish(process, None)
    }

    fn finish(&self, process: &Arc<UserProcess>, status: Option<i32>) -> SyscallOutcome {
        let (was_running, released) = {
            let mut inner = process.lock();
            if inner.state == ProcessState::Exited {
                return SyscallOutcome::Exited;
            }
            let was_running = inner.state == ProcessState::Running;
            let released = inner.release_resources(&self.pages);
            inner.exit_status = status;
            inner.state = ProcessState::Exited;
            (was_running, released)
        };

        let orphans = process.detach_children();
        debug!(
            "Process {} released {} pages, orphaned {} children",
            process.pid(),
            released,
            orphans
        );
        process.signal_exit(status);
        self.processes.remove(process.pid());

        if was_running && self.processes.mark_finished() == 0 {
            info!("Last process exited, halting");
            self.machine.halt();
            return SyscallOutcome::Halted;
        }
        SyscallOutcome::Exited
    }

    /// Waits for child `pid` of `parent` to finish. A child can be joined once.
    pub fn join(&self, parent: &UserProcess, pid: Pid) -> JoinOutcome {
        let Some(child) = parent.take_child(pid) else {
            debug!("Process {} cannot join {}: not a child", parent.pid(), pid);
            return JoinOutcome::NotAChild;
        };
        debug!("Process {} joining {}", parent.pid(), pid);
        let status = child.wait();
        debug!("Process {} joined {} ({:?})", parent.pid(), pid, status);
        JoinOutcome::Joined(status)
    }

    /// Powers the machine off if `process` is the root process.
    pub fn halt(&self, process: &UserProcess) -> bool {
        if !self.processes.is_root(process.pid()) {
            warn!("Process {} is not allowed to halt", process.pid());
            return false;
        }
        info!("Process {} halted the machine", process.pid());
        self.processes.log_table();
        self.machine.halt();
        true
    }

    /// Entry point for every trap out of user mode.
    ///
    /// Panics if `pid` does not name a live process.
    pub fn handle_exception(&self, pid: Pid, registers: &mut Registers) -> SyscallOutcome {
        let process = self
            .processes
            .get(pid)
            .unwrap_or_else(|| panic!("exception from pid {} with no process", pid));
        exceptions::handle_exception(self, &process, registers)
    }

    pub fn read_virtual_memory(&self, process: &UserProcess, vaddr: i32, buf: &mut [u8]) -> usize {
        process.read_virtual_memory(self.memory(), vaddr, buf)
    }

    pub fn write_virtual_memory(&self, process: &UserProcess, vaddr: i32, data: &[u8]) -> usize {
        process.write_virtual_memory(self.memory(), vaddr, data)
    }

    pub fn read_virtual_memory_string(
        &self,
        process: &UserProcess,
        vaddr: i32,
        max_len: usize,
    ) -> Option<String> {
        process.read_virtual_memory_string(self.memory(), vaddr, max_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constants::memory::PAGE_SIZE,
        test_support::{test_kernel, TestMachine},
    };
    use std::{thread, time::Duration};

    #[test]
    fn test_run_starts_root_shell() {
        let (kernel, machine) = test_kernel(64);
        let root = kernel.run().unwrap();
        assert_eq!(root, Pid(0));
        assert_eq!(kernel.processes().root(), Some(Pid(0)));

        let started = machine.started();
        assert_eq!(started.len(), 1);
        let (pid, regs) = started[0];
        assert_eq!(pid, Pid(0));
        let layout = kernel.process(pid).unwrap().layout().unwrap();
        assert_eq!(regs.pc, layout.entry_point as i32);
        assert_eq!(kernel.process(pid).unwrap().state(), ProcessState::Running);
    }

    #[test]
    fn test_run_without_shell() {
        let machine = Arc::new(TestMachine::new(16));
        let kernel = UserKernel::new(
            KernelConfig::new().with_shell("missing.coff", &[]),
            machine.clone(),
            Arc::new(crate::filesys::memory::MemFileSystem::new()),
            Arc::new(crate::devices::console::QueueConsole::new()),
            Arc::new(crate::processes::image::FlatImageFormat),
        );
        assert_eq!(kernel.run().err(), Some(LoadError::NotFound));
        assert!(kernel.processes().is_empty());
        assert_eq!(kernel.free_pages(), 16);
        assert!(machine.started().is_empty());
    }

    #[test]
    fn test_spawn_links_child() {
        let (kernel, machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();

        let child = kernel.spawn(&root, "echo.coff", &[]).unwrap();
        assert_eq!(root.child_pids(), vec![child]);
        assert_eq!(kernel.process(child).unwrap().parent(), Some(Pid(0)));
        assert_eq!(machine.started().len(), 2);
    }

    #[test]
    fn test_failed_spawn_not_linked() {
        let (kernel, _machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let free = kernel.free_pages();

        assert_eq!(
            kernel.spawn(&root, "missing.coff", &[]).err(),
            Some(LoadError::NotFound)
        );
        assert!(root.child_pids().is_empty());
        assert_eq!(kernel.free_pages(), free);
        assert_eq!(kernel.processes().len(), 1);
    }

    #[test]
    fn test_exit_releases_exactly_its_pages() {
        let (kernel, _machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let pid = kernel.spawn(&root, "echo.coff", &[]).unwrap();
        let child = kernel.process(pid).unwrap();

        let held = child.page_count();
        assert!(held > 0);
        let free = kernel.free_pages();
        assert_eq!(kernel.exit(&child, 0), SyscallOutcome::Exited);
        assert_eq!(kernel.free_pages(), free + held);
        assert_eq!(child.page_count(), 0);
        assert_eq!(child.open_file_count(), 0);
        assert_eq!(child.state(), ProcessState::Exited);
        assert!(kernel.process(pid).is_none());
    }

    #[test]
    fn test_join_returns_status_once() {
        let (kernel, _machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let pid = kernel.spawn(&root, "echo.coff", &[]).unwrap();
        let child = kernel.process(pid).unwrap();

        kernel.exit(&child, 7);
        assert_eq!(kernel.join(&root, pid), JoinOutcome::Joined(Some(7)));
        assert_eq!(kernel.join(&root, pid), JoinOutcome::NotAChild);
    }

    #[test]
    fn test_join_unknown_pid_does_not_block() {
        let (kernel, _machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        assert_eq!(kernel.join(&root, Pid(99)), JoinOutcome::NotAChild);
        assert_eq!(kernel.join(&root, Pid(0)), JoinOutcome::NotAChild);
    }

    #[test]
    fn test_join_blocks_until_child_exits() {
        let (kernel, _machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let pid = kernel.spawn(&root, "echo.coff", &[]).unwrap();
        let child = kernel.process(pid).unwrap();

        let exiter = Arc::clone(&kernel);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            exiter.exit(&child, 3);
        });
        assert_eq!(kernel.join(&root, pid), JoinOutcome::Joined(Some(3)));
        handle.join().unwrap();
    }

    #[test]
    fn test_terminated_child_has_no_status() {
        let (kernel, _machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let pid = kernel.spawn(&root, "echo.coff", &[]).unwrap();
        kernel.terminate(&kernel.process(pid).unwrap());
        assert_eq!(kernel.join(&root, pid), JoinOutcome::Joined(None));
    }

    #[test]
    fn test_exit_orphans_children() {
        let (kernel, _machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let middle = kernel.process(kernel.spawn(&root, "echo.coff", &[]).unwrap()).unwrap();
        let grandchild = kernel.spawn(&middle, "echo.coff", &[]).unwrap();

        kernel.exit(&middle, 0);
        let grandchild = kernel.process(grandchild).unwrap();
        assert_eq!(grandchild.parent(), None);
        assert_eq!(grandchild.state(), ProcessState::Running);
    }

    #[test]
    fn test_last_exit_halts() {
        let (kernel, machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let pid = kernel.spawn(&root, "echo.coff", &[]).unwrap();

        assert_eq!(kernel.exit(&root, 0), SyscallOutcome::Exited);
        assert!(!machine.is_halted());
        let child = kernel.process(pid).unwrap();
        assert_eq!(kernel.exit(&child, 0), SyscallOutcome::Halted);
        assert!(machine.is_halted());
        assert_eq!(kernel.free_pages(), 64);
    }

    #[test]
    fn test_exit_twice_is_harmless() {
        let (kernel, machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let pid = kernel.spawn(&root, "echo.coff", &[]).unwrap();
        let child = kernel.process(pid).unwrap();
        kernel.exit(&child, 1);
        assert_eq!(kernel.terminate(&child), SyscallOutcome::Exited);
        assert_eq!(child.exit_status(), Some(1));
        assert!(!machine.is_halted());
    }

    #[test]
    fn test_halt_only_from_root() {
        let (kernel, machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let pid = kernel.spawn(&root, "echo.coff", &[]).unwrap();

        assert!(!kernel.halt(&kernel.process(pid).unwrap()));
        assert!(!machine.is_halted());
        assert!(kernel.halt(&root));
        assert!(machine.is_halted());
    }

    #[test]
    fn test_spawn_passes_arguments() {
        let (kernel, machine) = test_kernel(64);
        kernel.run().unwrap();
        let root = kernel.process(Pid(0)).unwrap();
        let args = vec!["echo".to_string(), "hi".to_string()];
        let pid = kernel.spawn(&root, "echo.coff", &args).unwrap();
        let child = kernel.process(pid).unwrap();

        let (_, regs) = machine.started()[1];
        assert_eq!(regs.gpr[crate::processes::registers::REG_A0], 2);
        let argv = regs.gpr[crate::processes::registers::REG_A1];
        let mut pointer = [0u8; 4];
        kernel.read_virtual_memory(&child, argv + 4, &mut pointer);
        assert_eq!(
            kernel.read_virtual_memory_string(&child, i32::from_le_bytes(pointer), 16),
            Some("hi".to_string())
        );
        assert_eq!(argv as usize % PAGE_SIZE, 0);
    }

    #[test]
    #[should_panic]
    fn test_exception_without_process_panics() {
        let (kernel, _machine) = test_kernel(64);
        let mut regs = Registers::new();
        kernel.handle_exception(Pid(5), &mut regs);
    }
}
