/// Capacity of every per-process descriptor table.
pub const MAX_OPEN_FILES: usize = 16;

/// Longest string (without terminator) the kernel reads out of user memory.
pub const MAX_STRING_LEN: usize = 256;

/// Every program passed to exec must carry this suffix.
pub const EXECUTABLE_SUFFIX: &str = ".coff";

pub const STDIN_FD: usize = 0;
pub const STDOUT_FD: usize = 1;
/// `creat` never hands out the console slots.
pub const FIRST_FILE_FD: usize = 2;

/// Bytes taken by one argv pointer in the argument block.
pub const ARGV_POINTER_SIZE: usize = 4;

pub const DEFAULT_SHELL_PROGRAM: &str = "sh.coff";
