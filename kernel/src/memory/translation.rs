//! Per-process virtual-to-physical translation.
//!
//! Every kernel access to user memory goes through [`AddressSpace`], so a
//! misbehaving program can only ever touch the pages mapped for it. Copies
//! never fail loudly: an invalid address simply yields a short (possibly
//! zero) byte count.

use crate::{constants::memory::PAGE_SIZE, memory::physical::PhysicalMemory};

use super::split_address;

/// One virtual page's mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranslationEntry {
    pub vpn: usize,
    pub ppn: usize,
    /// An invalid entry is never used for translation.
    pub valid: bool,
    pub read_only: bool,
    /// Set on every successful access.
    pub used: bool,
    /// Set on every successful write.
    pub dirty: bool,
}

impl TranslationEntry {
    pub fn new(vpn: usize, ppn: usize, read_only: bool) -> Self {
        TranslationEntry {
            vpn,
            ppn,
            valid: true,
            read_only,
            used: false,
            dirty: false,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// Translation table indexed by virtual page number.
#[derive(Debug, Default)]
pub struct AddressSpace {
    entries: Vec<TranslationEntry>,
}

impl AddressSpace {
    pub fn new() -> Self {
        AddressSpace {
            entries: Vec::new(),
        }
    }

    /// Number of virtual pages in the table, valid or not.
    pub fn num_pages(&self) -> usize {
        self.entries.len()
    }

    pub fn entry(&self, vpn: usize) -> Option<&TranslationEntry> {
        self.entries.get(vpn)
    }

    /// Maps `vpn` to `ppn`, growing the table with invalid entries if needed.
    pub fn map(&mut self, vpn: usize, ppn: usize, read_only: bool) {
        if vpn >= self.entries.len() {
            self.entries.resize_with(vpn + 1, TranslationEntry::default);
        }
        self.entries[vpn] = TranslationEntry::new(vpn, ppn, read_only);
    }

    /// Physical pages of every valid entry.
    pub fn mapped_pages(&self) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|entry| entry.valid)
            .map(|entry| entry.ppn)
            .collect()
    }

    /// Invalidates the whole table and hands back the physical pages it held.
    pub fn unmap_all(&mut self) -> Vec<usize> {
        let pages = self.mapped_pages();
        self.entries.clear();
        pages
    }

    /// Copies from virtual memory at `vaddr` into `buf`.
    ///
    /// Returns how many bytes were copied; the copy stops at the first page
    /// that is out of bounds or invalid, and at the end of physical memory.
    pub fn read(&mut self, memory: &PhysicalMemory, vaddr: i32, buf: &mut [u8]) -> usize {
        self.transfer(memory, vaddr, buf.len(), Access::Read, |paddr, range| {
            memory.read(paddr, &mut buf[range])
        })
    }

    /// Copies `data` into virtual memory at `vaddr`.
    ///
    /// Same stopping rules as [`AddressSpace::read`], and additionally stops
    /// at the first read-only page.
    pub fn write(&mut self, memory: &PhysicalMemory, vaddr: i32, data: &[u8]) -> usize {
        self.transfer(memory, vaddr, data.len(), Access::Write, |paddr, range| {
            memory.write(paddr, &data[range])
        })
    }

    /// Reads a NUL-terminated string of at most `max_len` bytes (terminator
    /// excluded). Returns `None` if no terminator shows up in the first
    /// `max_len + 1` readable bytes, or if the string is not UTF-8.
    pub fn read_string(
        &mut self,
        memory: &PhysicalMemory,
        vaddr: i32,
        max_len: usize,
    ) -> Option<String> {
        let mut bytes = vec![0u8; max_len + 1];
        let read = self.read(memory, vaddr, &mut bytes);

        bytes[..read]
            .iter()
            .position(|&b| b == 0)
            .and_then(|len| String::from_utf8(bytes[..len].to_vec()).ok())
    }

    fn transfer<F>(
        &mut self,
        memory: &PhysicalMemory,
        vaddr: i32,
        length: usize,
        access: Access,
        mut copy: F,
    ) -> usize
    where
        F: FnMut(usize, core::ops::Range<usize>) -> usize,
    {
        if vaddr < 0 {
            return 0;
        }
        let vaddr = vaddr as usize;
        let mut copied = 0;

        while copied < length {
            let (vpn, offset) = split_address(vaddr + copied);
            let entry = match self.entries.get_mut(vpn) {
                Some(entry) if entry.valid => entry,
                _ => break,
            };
            if access == Access::Write && entry.read_only {
                break;
            }

            let paddr = entry.ppn * PAGE_SIZE + offset;
            if paddr >= memory.len() {
                break;
            }
            let chunk = (PAGE_SIZE - offset).min(length - copied);
            let amount = copy(paddr, copied..copied + chunk);

            entry.used = true;
            if access == Access::Write {
                entry.dirty = true;
            }

            copied += amount;
            if amount < chunk {
                break;
            }
        }

        copied
    }
}
