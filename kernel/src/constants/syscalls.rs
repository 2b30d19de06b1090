// Syscall numbers
pub const SYSCALL_HALT: i32 = 0;
pub const SYSCALL_EXIT: i32 = 1;
pub const SYSCALL_EXEC: i32 = 2;
pub const SYSCALL_JOIN: i32 = 3;
pub const SYSCALL_CREATE: i32 = 4;
pub const SYSCALL_OPEN: i32 = 5;
pub const SYSCALL_READ: i32 = 6;
pub const SYSCALL_WRITE: i32 = 7;
pub const SYSCALL_CLOSE: i32 = 8;
pub const SYSCALL_UNLINK: i32 = 9;

// Values returned to user code
pub const SYSCALL_FAILURE: i32 = -1;
pub const JOIN_EXITED: i32 = 1;
pub const JOIN_NO_STATUS: i32 = 0;

// Exception causes raised by the processor
pub const EXCEPTION_SYSCALL: i32 = 0;
pub const EXCEPTION_PAGE_FAULT: i32 = 1;
pub const EXCEPTION_TLB_MISS: i32 = 2;
pub const EXCEPTION_READ_ONLY: i32 = 3;
pub const EXCEPTION_BUS_ERROR: i32 = 4;
pub const EXCEPTION_ADDRESS_ERROR: i32 = 5;
pub const EXCEPTION_OVERFLOW: i32 = 6;
pub const EXCEPTION_ILLEGAL_INSTRUCTION: i32 = 7;
