//! Physical page allocator
//!
//! Allocates whole 4096-byte pages for user memory,
//! page-table pages and trapframes.
//! The pages come from an arena standing in for the RAM above KERNBASE,
//! the n-th frame of the arena lives at physical address KERNBASE + n*PGSIZE.

use alloc::vec::Vec;
use bit_field::BitField;

use core::cell::UnsafeCell;
use core::convert::TryFrom;
use core::ptr;

use crate::consts::{KERNBASE, PGSIZE, PHYSTOP};
use crate::spinlock::SpinLock;
use super::{Addr, PhysAddr};

/// Freed pages are filled with junk to catch dangling refs.
const JUNK: u8 = 5;

#[repr(C, align(4096))]
struct Frame([u8; PGSIZE]);

/// Physical memory managed page by page.
pub struct PhysMem {
    frames: Vec<UnsafeCell<Frame>>,
    kmem: SpinLock<Kmem>,
    trampoline: PhysAddr,
}

// Each frame is owned by exactly one holder of its PhysAddr,
// who is the only one dereferencing it.
unsafe impl Sync for PhysMem {}

struct Kmem {
    /// indices of free frames, the lowest one on top
    free: Vec<usize>,
    /// one bit per frame, set when the frame is handed out
    alloc: Vec<u8>,
}

impl Kmem {
    fn is_alloc_set(&self, index: usize) -> bool {
        self.alloc[index / 8].get_bit(index % 8)
    }

    fn alloc_set(&mut self, index: usize, set_or_clear: bool) {
        self.alloc[index / 8].set_bit(index % 8, set_or_clear);
    }
}

impl PhysMem {
    /// Bring up an arena of `npages` physical pages.
    /// One of them is kept as the trampoline page,
    /// which is shared by every user page table.
    pub fn new(npages: usize) -> Self {
        let max_pages = (usize::from(PHYSTOP) - usize::from(KERNBASE)) / PGSIZE;
        if npages < 2 || npages > max_pages {
            panic!("kinit: cannot manage {} pages", npages);
        }

        let mut frames = Vec::with_capacity(npages);
        for _ in 0..npages {
            frames.push(UnsafeCell::new(Frame([JUNK; PGSIZE])));
        }
        let kmem = Kmem {
            free: (0..npages).rev().collect(),
            alloc: alloc::vec![0u8; (npages + 7) / 8],
        };

        let mut mem = Self {
            frames,
            kmem: SpinLock::new(kmem, "kmem"),
            trampoline: PhysAddr::from_ppn(usize::from(KERNBASE) >> crate::consts::PGSHIFT),
        };
        mem.trampoline = match mem.kalloc() {
            Some(pa) => pa,
            None => panic!("kinit: no page for trampoline"),
        };

        #[cfg(feature = "verbose_init_info")]
        println!(
            "PhysMem: available physical memory [{:#x}, {:#x}), trampoline at {:#x}",
            usize::from(KERNBASE),
            usize::from(KERNBASE) + npages * PGSIZE,
            mem.trampoline.as_usize(),
        );

        mem
    }

    /// Allocate one 4096-byte page of physical memory.
    /// Returns None if the memory cannot be allocated.
    /// The content of the page is junk.
    pub fn kalloc(&self) -> Option<PhysAddr> {
        let mut guard = self.kmem.lock();
        let index = guard.free.pop()?;
        guard.alloc_set(index, true);
        drop(guard);
        Some(self.frame_addr(index))
    }

    /// Free the page of physical memory at pa,
    /// which normally should have been returned by a call to kalloc().
    pub fn kfree(&self, pa: PhysAddr) {
        if pa == self.trampoline {
            panic!("kfree: trampoline page");
        }
        let index = self.frame_index(pa);

        // Fill with junk to catch dangling refs.
        unsafe { ptr::write_bytes(self.page_ptr(pa), JUNK, PGSIZE); }

        let mut guard = self.kmem.lock();
        if !guard.is_alloc_set(index) {
            panic!("kfree: {:#x} is not allocated", pa.as_usize());
        }
        guard.alloc_set(index, false);
        guard.free.push(index);
        drop(guard);
    }

    /// Number of pages that kalloc() can still hand out.
    pub fn free_pages(&self) -> usize {
        self.kmem.lock().free.len()
    }

    /// The physical page holding the trampoline code.
    pub fn trampoline(&self) -> PhysAddr {
        self.trampoline
    }

    /// Raw pointer to the first byte of the page at pa.
    ///
    /// SAFETY: the caller must own the page at pa,
    ///     i.e., it was returned by kalloc() and not freed since.
    pub unsafe fn page_ptr(&self, pa: PhysAddr) -> *mut u8 {
        self.frames[self.frame_index(pa)].get() as *mut u8
    }

    /// Zero the whole page at pa.
    ///
    /// SAFETY: see [`PhysMem::page_ptr`].
    pub unsafe fn zero_page(&self, pa: PhysAddr) {
        ptr::write_bytes(self.page_ptr(pa), 0, PGSIZE);
    }

    fn frame_index(&self, pa: PhysAddr) -> usize {
        let raw = pa.as_usize();
        let base = usize::from(KERNBASE);
        if raw < base || raw % PGSIZE != 0 || (raw - base) / PGSIZE >= self.frames.len() {
            panic!("PhysMem: {:#x} is not a managed page", raw);
        }
        (raw - base) / PGSIZE
    }

    fn frame_addr(&self, index: usize) -> PhysAddr {
        match PhysAddr::try_from(usize::from(KERNBASE) + index * PGSIZE) {
            Ok(pa) => pa,
            Err(s) => panic!("PhysMem: frame {} out of range, {}", index, s),
        }
    }
}
