//! Syscall dispatcher.
//!
//! Every argument is untrusted. Addresses only ever reach memory through the
//! calling process's address space, and every recoverable failure turns into
//! [`SYSCALL_FAILURE`] before it gets back to user code.

use std::sync::Arc;

use log::{debug, warn};

use crate::{
    constants::{
        memory::PAGE_SIZE,
        processes::{ARGV_POINTER_SIZE, EXECUTABLE_SUFFIX, FIRST_FILE_FD, MAX_STRING_LEN, STDIN_FD},
        syscalls::{JOIN_EXITED, JOIN_NO_STATUS, SYSCALL_FAILURE},
    },
    kernel::{JoinOutcome, UserKernel},
    processes::{process::UserProcess, Pid},
    syscalls::{Syscall, SyscallOutcome},
};

/// Runs syscall `number` for `process`.
///
/// Panics on an unknown syscall number.
pub fn dispatch_syscall(
    kernel: &UserKernel,
    process: &Arc<UserProcess>,
    number: i32,
    args: [i32; 4],
) -> SyscallOutcome {
    let syscall = Syscall::try_from(number)
        .unwrap_or_else(|number| panic!("Unknown syscall: {}", number));
    let [a0, a1, a2, _a3] = args;

    match syscall {
        Syscall::Halt => sys_halt(kernel, process),
        Syscall::Exit => kernel.exit(process, a0),
        Syscall::Exec => SyscallOutcome::Return(sys_exec(kernel, process, a0, a1, a2)),
        Syscall::Join => SyscallOutcome::Return(sys_join(kernel, process, a0, a1)),
        Syscall::Create => SyscallOutcome::Return(sys_open(kernel, process, a0, true)),
        Syscall::Open => SyscallOutcome::Return(sys_open(kernel, process, a0, false)),
        Syscall::Read => SyscallOutcome::Return(sys_read(kernel, process, a0, a1, a2)),
        Syscall::Write => SyscallOutcome::Return(sys_write(kernel, process, a0, a1, a2)),
        Syscall::Close => SyscallOutcome::Return(sys_close(process, a0)),
        Syscall::Unlink => SyscallOutcome::Return(sys_unlink(kernel, process, a0)),
    }
}

fn sys_halt(kernel: &UserKernel, process: &UserProcess) -> SyscallOutcome {
    if kernel.halt(process) {
        SyscallOutcome::Halted
    } else {
        SyscallOutcome::Return(SYSCALL_FAILURE)
    }
}

fn read_string(kernel: &UserKernel, process: &UserProcess, vaddr: i32) -> Option<String> {
    if vaddr < 0 {
        return None;
    }
    kernel.read_virtual_memory_string(process, vaddr, MAX_STRING_LEN)
}

/// Reads `argc` string pointers starting at `argv` and the strings they
/// point at.
fn read_arguments(
    kernel: &UserKernel,
    process: &UserProcess,
    argc: i32,
    argv: i32,
) -> Option<Vec<String>> {
    let argc = usize::try_from(argc).ok()?;
    if argc * ARGV_POINTER_SIZE > PAGE_SIZE {
        return None;
    }

    let mut args = Vec::with_capacity(argc);
    for index in 0..argc {
        let slot = argv.checked_add((index * ARGV_POINTER_SIZE) as i32)?;
        let mut pointer = [0u8; ARGV_POINTER_SIZE];
        if kernel.read_virtual_memory(process, slot, &mut pointer) != ARGV_POINTER_SIZE {
            return None;
        }
        args.push(read_string(kernel, process, i32::from_le_bytes(pointer))?);
    }
    Some(args)
}

fn sys_exec(
    kernel: &UserKernel,
    process: &Arc<UserProcess>,
    name_addr: i32,
    argc: i32,
    argv: i32,
) -> i32 {
    if argc < 0 || argv < 0 {
        return SYSCALL_FAILURE;
    }
    let Some(name) = read_string(kernel, process, name_addr) else {
        return SYSCALL_FAILURE;
    };
    if !name.ends_with(EXECUTABLE_SUFFIX) {
        debug!("exec: {} is not an executable name", name);
        return SYSCALL_FAILURE;
    }
    let Some(args) = read_arguments(kernel, process, argc, argv) else {
        debug!("exec: bad argument vector at {:#x}", argv);
        return SYSCALL_FAILURE;
    };

    match kernel.spawn(process, &name, &args) {
        Ok(Pid(pid)) => pid as i32,
        Err(_) => SYSCALL_FAILURE,
    }
}

fn sys_join(kernel: &UserKernel, process: &UserProcess, pid: i32, status_addr: i32) -> i32 {
    let Ok(pid) = u32::try_from(pid) else {
        return SYSCALL_FAILURE;
    };

    match kernel.join(process, Pid(pid)) {
        JoinOutcome::NotAChild => SYSCALL_FAILURE,
        JoinOutcome::Joined(None) => JOIN_NO_STATUS,
        JoinOutcome::Joined(Some(status)) => {
            let bytes = status.to_le_bytes();
            if kernel.write_virtual_memory(process, status_addr, &bytes) != bytes.len() {
                warn!(
                    "join: could not store status of {} at {:#x}",
                    pid, status_addr
                );
            }
            JOIN_EXITED
        }
    }
}

/// `create` and `open`: both hand out the lowest free descriptor, but
/// `create` never takes the console slots.
fn sys_open(kernel: &UserKernel, process: &UserProcess, name_addr: i32, create: bool) -> i32 {
    let Some(name) = read_string(kernel, process, name_addr) else {
        return SYSCALL_FAILURE;
    };
    let lowest = if create { FIRST_FILE_FD } else { STDIN_FD };

    let mut inner = process.lock();
    if inner.files.free_slot(lowest).is_none() {
        debug!("process {}: descriptor table full", process.pid());
        return SYSCALL_FAILURE;
    }
    let handle = match kernel.file_system().open(&name, create) {
        Ok(handle) => handle,
        Err(err) => {
            debug!("process {}: open {} failed: {}", process.pid(), name, err);
            return SYSCALL_FAILURE;
        }
    };
    match inner.files.allocate(handle, lowest) {
        Ok(fd) => fd as i32,
        Err(_) => SYSCALL_FAILURE,
    }
}

fn sys_read(kernel: &UserKernel, process: &UserProcess, fd: i32, buf_addr: i32, count: i32) -> i32 {
    let Ok(count) = usize::try_from(count) else {
        return SYSCALL_FAILURE;
    };
    if buf_addr < 0 {
        return SYSCALL_FAILURE;
    }

    let mut guard = process.lock();
    let inner = &mut *guard;
    let Ok(file) = inner.files.get_mut(fd) else {
        return SYSCALL_FAILURE;
    };
    let mut buffer = vec![0u8; count];
    let read = match file.read(&mut buffer) {
        Ok(read) => read,
        Err(_) => return SYSCALL_FAILURE,
    };
    inner
        .address_space
        .write(kernel.memory(), buf_addr, &buffer[..read]) as i32
}

fn sys_write(kernel: &UserKernel, process: &UserProcess, fd: i32, buf_addr: i32, count: i32) -> i32 {
    let Ok(count) = usize::try_from(count) else {
        return SYSCALL_FAILURE;
    };
    if buf_addr < 0 {
        return SYSCALL_FAILURE;
    }

    let mut guard = process.lock();
    let inner = &mut *guard;
    let Ok(file) = inner.files.get_mut(fd) else {
        return SYSCALL_FAILURE;
    };
    let mut buffer = vec![0u8; count];
    let staged = inner.address_space.read(kernel.memory(), buf_addr, &mut buffer);
    match file.write(&buffer[..staged]) {
        Ok(written) => written as i32,
        Err(_) => SYSCALL_FAILURE,
    }
}

fn sys_close(process: &UserProcess, fd: i32) -> i32 {
    match process.lock().files.close(fd) {
        Ok(()) => 0,
        Err(_) => SYSCALL_FAILURE,
    }
}

fn sys_unlink(kernel: &UserKernel, process: &UserProcess, name_addr: i32) -> i32 {
    let Some(name) = read_string(kernel, process, name_addr) else {
        return SYSCALL_FAILURE;
    };
    if process.lock().files.is_open_named(&name) {
        debug!("process {}: {} is still open", process.pid(), name);
        return SYSCALL_FAILURE;
    }
    match kernel.file_system().remove(&name) {
        Ok(()) => 0,
        Err(_) => SYSCALL_FAILURE,
    }
}
