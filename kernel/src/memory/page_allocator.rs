//! Physical page allocator shared by every process.
//!
//! One bit per physical page: 1 = allocated, 0 = free. Every grant and
//! release goes through a single lock, so at most one allocation decision is
//! in flight at a time.

use log::{trace, warn};
use spin::Mutex;

use crate::constants::memory::{BITMAP_ENTRY_SIZE, FULL_BITMAP_ENTRY};

pub struct PageAllocator {
    inner: Mutex<PageBitmap>,
}

struct PageBitmap {
    total_pages: usize,
    free_pages: usize,
    bitmap: Box<[u64]>,
}

impl PageAllocator {
    /// Creates an allocator for physical pages `[0, total_pages)`, all free.
    pub fn new(total_pages: usize) -> Self {
        let bitmap_size = total_pages.div_ceil(BITMAP_ENTRY_SIZE);
        let mut bitmap = vec![0u64; bitmap_size].into_boxed_slice();

        // Bits past the last real page stay set so the scan never returns them.
        let tail = total_pages % BITMAP_ENTRY_SIZE;
        if tail != 0 {
            bitmap[bitmap_size - 1] = FULL_BITMAP_ENTRY << tail;
        }

        PageAllocator {
            inner: Mutex::new(PageBitmap {
                total_pages,
                free_pages: total_pages,
                bitmap,
            }),
        }
    }

    /// Grants the lowest-numbered free page, or `None` when every page is taken.
    pub fn acquire_page(&self) -> Option<usize> {
        let mut pages = self.inner.lock();
        match pages.first_free() {
            Some(ppn) => {
                pages.set_bit(ppn);
                trace!("granted physical page {}", ppn);
                Some(ppn)
            }
            None => {
                warn!("no free physical pages");
                None
            }
        }
    }

    /// Returns `ppn` to the pool.
    ///
    /// Releasing a page twice is a caller bug and is not detected here.
    /// Panics if `ppn` is outside the machine's memory.
    pub fn release_page(&self, ppn: usize) {
        let mut pages = self.inner.lock();
        pages.clear_bit(ppn);
        trace!("released physical page {}", ppn);
    }

    pub fn free_pages(&self) -> usize {
        self.inner.lock().free_pages
    }

    pub fn total_pages(&self) -> usize {
        self.inner.lock().total_pages
    }

    /// Check if page is allocated.
    pub fn is_page_used(&self, ppn: usize) -> bool {
        self.inner.lock().is_bit_set(ppn)
    }
}

impl PageBitmap {
    fn first_free(&self) -> Option<usize> {
        self.bitmap
            .iter()
            .enumerate()
            .find(|(_, entry)| **entry != FULL_BITMAP_ENTRY)
            .map(|(index, entry)| index * BITMAP_ENTRY_SIZE + entry.trailing_ones() as usize)
    }

    /// set a particular bit (1), taking in page index
    fn set_bit(&mut self, ppn: usize) {
        assert!(ppn < self.total_pages);

        let entry_index = ppn / BITMAP_ENTRY_SIZE;
        let bit_index = ppn % BITMAP_ENTRY_SIZE;

        self.bitmap[entry_index] |= 1 << bit_index;
        self.free_pages -= 1;
    }

    /// clear a particular bit (0), taking in page index
    fn clear_bit(&mut self, ppn: usize) {
        assert!(ppn < self.total_pages);

        let entry_index = ppn / BITMAP_ENTRY_SIZE;
        let bit_index = ppn % BITMAP_ENTRY_SIZE;

        self.bitmap[entry_index] &= !(1 << bit_index);
        self.free_pages += 1;
    }

    /// returns true if bit == 1, false otherwise
    fn is_bit_set(&self, ppn: usize) -> bool {
        assert!(ppn < self.total_pages);

        let entry_index = ppn / BITMAP_ENTRY_SIZE;
        let bit_index = ppn % BITMAP_ENTRY_SIZE;

        (self.bitmap[entry_index] & (1 << bit_index)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};
    use std::{collections::BTreeSet, sync::Arc, thread};

    #[test]
    fn test_acquire_lowest_free_page() {
        let pages = PageAllocator::new(4);
        assert_eq!(pages.acquire_page(), Some(0));
        assert_eq!(pages.acquire_page(), Some(1));
        assert_eq!(pages.acquire_page(), Some(2));

        pages.release_page(1);
        assert_eq!(pages.acquire_page(), Some(1));
        assert_eq!(pages.free_pages(), 1);
    }

    #[test]
    fn test_exhaustion_is_recoverable() {
        let pages = PageAllocator::new(2);
        assert!(pages.acquire_page().is_some());
        assert!(pages.acquire_page().is_some());
        assert_eq!(pages.acquire_page(), None);
        assert_eq!(pages.free_pages(), 0);

        pages.release_page(0);
        assert_eq!(pages.acquire_page(), Some(0));
    }

    #[test]
    fn test_page_count_not_multiple_of_bitmap_entry() {
        let pages = PageAllocator::new(70);
        let granted: Vec<usize> = core::iter::from_fn(|| pages.acquire_page()).collect();
        assert_eq!(granted, (0..70).collect::<Vec<_>>());
        assert_eq!(pages.free_pages(), 0);
    }

    #[test]
    fn test_empty_allocator() {
        let pages = PageAllocator::new(0);
        assert_eq!(pages.total_pages(), 0);
        assert_eq!(pages.acquire_page(), None);
    }

    #[test]
    #[should_panic]
    fn test_release_out_of_range_panics() {
        let pages = PageAllocator::new(8);
        pages.release_page(8);
    }

    /// Random acquire/release sequences keep the free count equal to
    /// total minus allocated, and never hand out a page twice.
    #[test]
    fn test_random_sequences_keep_counts_consistent() {
        let mut rng = SmallRng::seed_from_u64(0x5eed);
        let total = 100;
        let pages = PageAllocator::new(total);
        let mut owned = BTreeSet::new();

        for _ in 0..5000 {
            if rng.gen_bool(0.55) {
                if let Some(ppn) = pages.acquire_page() {
                    assert!(owned.insert(ppn), "page {} granted twice", ppn);
                } else {
                    assert_eq!(owned.len(), total);
                }
            } else if !owned.is_empty() {
                let nth = rng.gen_range(0..owned.len());
                let ppn = *owned.iter().nth(nth).unwrap();
                owned.remove(&ppn);
                pages.release_page(ppn);
            }

            assert_eq!(pages.free_pages(), total - owned.len());
            for &ppn in &owned {
                assert!(pages.is_page_used(ppn));
            }
        }
    }

    #[test]
    fn test_concurrent_acquire_never_duplicates() {
        let pages = Arc::new(PageAllocator::new(256));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let pages = Arc::clone(&pages);
                thread::spawn(move || {
                    let mut mine = Vec::new();
                    while let Some(ppn) = pages.acquire_page() {
                        mine.push(ppn);
                    }
                    mine
                })
            })
            .collect();

        let mut all = BTreeSet::new();
        for worker in workers {
            for ppn in worker.join().unwrap() {
                assert!(all.insert(ppn));
            }
        }
        assert_eq!(all.len(), 256);
        assert_eq!(pages.free_pages(), 0);
    }
}
