pub mod page_allocator;
pub mod physical;
pub mod translation;

use crate::constants::memory::PAGE_SIZE;

/// Splits a virtual address into (virtual page number, offset within page).
pub fn split_address(vaddr: usize) -> (usize, usize) {
    (vaddr / PAGE_SIZE, vaddr % PAGE_SIZE)
}
