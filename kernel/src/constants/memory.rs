/// Size of one virtual or physical page, in bytes. Fixed by the simulated processor.
pub const PAGE_SIZE: usize = 0x400;

/// Pages reserved below the argument page for the user stack.
pub const STACK_PAGES: usize = 8;

pub const BITMAP_ENTRY_SIZE: usize = 64;
pub const FULL_BITMAP_ENTRY: u64 = 0xFFFFFFFFFFFFFFFF;
