//! The machine's main memory as seen by the kernel.

use spin::RwLock;

use crate::constants::memory::PAGE_SIZE;

/// Flat byte array of `num_pages * PAGE_SIZE` bytes.
///
/// All accesses are clamped to the end of memory: a copy that would run past
/// the last byte is cut short and the shortened length is returned.
pub struct PhysicalMemory {
    bytes: RwLock<Box<[u8]>>,
    num_pages: usize,
}

impl PhysicalMemory {
    pub fn new(num_pages: usize) -> Self {
        PhysicalMemory {
            bytes: RwLock::new(vec![0u8; num_pages * PAGE_SIZE].into_boxed_slice()),
            num_pages,
        }
    }

    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.num_pages * PAGE_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.num_pages == 0
    }

    /// Copies out of memory starting at `paddr`. Returns bytes copied.
    pub fn read(&self, paddr: usize, buf: &mut [u8]) -> usize {
        let memory = self.bytes.read();
        if paddr >= memory.len() {
            return 0;
        }
        let amount = buf.len().min(memory.len() - paddr);
        buf[..amount].copy_from_slice(&memory[paddr..paddr + amount]);
        amount
    }

    /// Copies into memory starting at `paddr`. Returns bytes copied.
    pub fn write(&self, paddr: usize, data: &[u8]) -> usize {
        let mut memory = self.bytes.write();
        if paddr >= memory.len() {
            return 0;
        }
        let amount = data.len().min(memory.len() - paddr);
        memory[paddr..paddr + amount].copy_from_slice(&data[..amount]);
        amount
    }

    /// Fills physical page `ppn` with zeroes.
    pub fn zero_page(&self, ppn: usize) {
        let start = ppn * PAGE_SIZE;
        let mut memory = self.bytes.write();
        if start < memory.len() {
            let end = (start + PAGE_SIZE).min(memory.len());
            memory[start..end].fill(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write() {
        let memory = PhysicalMemory::new(2);
        assert_eq!(memory.len(), 2 * PAGE_SIZE);
        assert_eq!(memory.write(10, b"hello"), 5);

        let mut buf = [0u8; 5];
        assert_eq!(memory.read(10, &mut buf), 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_access_clamped_to_end_of_memory() {
        let memory = PhysicalMemory::new(1);
        assert_eq!(memory.write(PAGE_SIZE - 2, b"abcd"), 2);

        let mut buf = [0u8; 4];
        assert_eq!(memory.read(PAGE_SIZE - 2, &mut buf), 2);
        assert_eq!(&buf[..2], b"ab");
        assert_eq!(memory.read(PAGE_SIZE, &mut buf), 0);
        assert_eq!(memory.write(PAGE_SIZE + 100, b"x"), 0);
    }

    #[test]
    fn test_zero_page() {
        let memory = PhysicalMemory::new(2);
        memory.write(PAGE_SIZE, &[0xAA; PAGE_SIZE]);
        memory.write(0, &[0xBB; 4]);
        memory.zero_page(1);

        let mut page = vec![0xFFu8; PAGE_SIZE];
        memory.read(PAGE_SIZE, &mut page);
        assert!(page.iter().all(|&b| b == 0));

        let mut untouched = [0u8; 4];
        memory.read(0, &mut untouched);
        assert_eq!(untouched, [0xBB; 4]);
    }
}
