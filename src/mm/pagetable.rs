use core::cmp::min;
use core::convert::TryFrom;
use core::ptr;

use crate::consts::{PGSHIFT, PGSIZE, SV39FLAGLEN, TRAMPOLINE, TRAPFRAME, USERTEXT};
use super::{pg_round_down, pg_round_up, Addr, PageAligned, PageBox, PhysAddr, PhysMem, VirtAddr};

bitflags! {
    pub struct PteFlag: usize {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// PTE struct used in PageTable
///
/// It is not suitable to implement this with enum types,
/// because the lower 10-bits are used for flags.
/// So we need to do extra non-trivial conversion between its data and the child table.
#[repr(C)]
#[derive(Clone, Copy)]
struct PageTableEntry {
    data: usize,
}

impl PageTableEntry {
    #[inline]
    fn is_valid(&self) -> bool {
        (self.data & (PteFlag::V.bits())) > 0
    }

    #[inline]
    fn is_user(&self) -> bool {
        (self.data & (PteFlag::U.bits())) > 0
    }

    /// A valid pte with none of R/W/X set points to a lower-level table.
    #[inline]
    fn is_leaf(&self) -> bool {
        (self.data & (PteFlag::R | PteFlag::W | PteFlag::X).bits()) > 0
    }

    #[inline]
    fn as_phys_addr(&self) -> PhysAddr {
        PhysAddr::from_ppn(self.data >> SV39FLAGLEN)
    }

    #[inline]
    fn flags(&self) -> PteFlag {
        PteFlag::from_bits_truncate(self.data)
    }

    #[inline]
    fn write_zero(&mut self) {
        self.data = 0;
    }

    #[inline]
    fn write(&mut self, pa: PhysAddr) {
        self.data = ((pa.as_usize() >> PGSHIFT) << SV39FLAGLEN) | (PteFlag::V.bits());
    }

    #[inline]
    fn write_perm(&mut self, pa: PhysAddr, perm: PteFlag) {
        self.data = ((pa.as_usize() >> PGSHIFT) << SV39FLAGLEN) | (perm | PteFlag::V).bits()
    }

    #[inline]
    fn clear_flag(&mut self, flag: PteFlag) {
        self.data &= !flag.bits();
    }
}

#[repr(C, align(4096))]
pub struct PageTable {
    data: [PageTableEntry; 512],
}

unsafe impl PageAligned for PageTable {}

impl<'m> PageBox<'m, PageTable> {
    /// Create a user page table for a given process,
    /// with no user memory, but with trampoline and trapframe pages.
    /// Return None if no enough memory.
    pub fn alloc_proc_pagetable(mem: &'m PhysMem, trapframe: PhysAddr) -> Option<Self> {
        let mut pagetable = PageBox::<PageTable>::new(mem)?;

        // map the trampoline code (for system call return)
        // at the highest user virtual address.
        // only the supervisor uses it, on the way
        // to/from user space, so not PTE_U.
        if pagetable.map_pages(
            VirtAddr::from_const(TRAMPOLINE),
            PGSIZE,
            mem.trampoline(),
            PteFlag::R | PteFlag::X,
        ).is_err() {
            pagetable.free_walk();
            return None
        }

        // map the trapframe just below TRAMPOLINE, for trampoline code.
        if pagetable.map_pages(
            VirtAddr::from_const(TRAPFRAME),
            PGSIZE,
            trapframe,
            PteFlag::R | PteFlag::W,
        ).is_err() {
            pagetable.uvm_unmap(usize::from(TRAMPOLINE), 1, false);
            pagetable.free_walk();
            return None
        }

        Some(pagetable)
    }

    /// Free a process's page table, and free the
    /// physical memory it refers to.
    /// The trampoline and the trapframe pages are not freed,
    /// they are owned by someone else.
    pub fn dealloc_proc_pagetable(mut self, proc_size: usize) {
        self.uvm_unmap(usize::from(TRAMPOLINE), 1, false);
        self.uvm_unmap(usize::from(TRAPFRAME), 1, false);
        if proc_size > 0 {
            self.uvm_unmap(0, pg_round_up(proc_size) / PGSIZE, true);
        }
        self.free_walk();
        // the root page is freed when self is dropped
    }

    /// Create PTEs for virtual addresses starting at va that refer to
    /// physical addresses starting at pa. va and size might not
    /// be page-aligned. Returns Ok(()) on success, Err(_) if walk() couldn't
    /// allocate a needed page-table page.
    pub fn map_pages(
        &mut self,
        va: VirtAddr,
        size: usize,
        mut pa: PhysAddr,
        perm: PteFlag,
    ) -> Result<(), &'static str> {
        if size == 0 {
            panic!("map_pages: size is zero");
        }
        let mut a = pg_round_down(va.as_usize());
        let last = pg_round_down(va.as_usize() + size - 1);

        loop {
            let cur = VirtAddr::try_from(a)?;
            match self.walk(cur, true) {
                Some(pte) => {
                    if pte.is_valid() {
                        println!(
                            "va: {:#x}, pa: {:#x}, pte: {:#x}",
                            a,
                            pa.as_usize(),
                            pte.data
                        );
                        panic!("remap");
                    }
                    pte.write_perm(pa, perm);
                }
                None => {
                    return Err("PageTable.map_pages: \
                    not enough memory for new page table")
                }
            }
            if a == last {
                break;
            }
            a += PGSIZE;
            pa.add_page();
        }

        Ok(())
    }

    /// Return the bottom level of PTE that corresponds to the given va.
    /// i.e. this PTE contains the pa that is mapped for the given va.
    ///
    /// if alloc is true then allocate new page table necessarily
    /// but doesn't change anything.(lazy allocation)
    fn walk(&mut self, va: VirtAddr, alloc: bool) -> Option<&mut PageTableEntry> {
        let pte = self.walk_raw(va, alloc)?;
        unsafe { Some(&mut *pte) }
    }

    /// Shared body of walk.
    /// The page-table pages are owned by this root,
    /// so raw pointers into them stay valid while self is borrowed.
    fn walk_raw(&self, va: VirtAddr, alloc: bool) -> Option<*mut PageTableEntry> {
        let mem = self.mem();
        let mut page_table = self.as_ptr();
        for level in (1..=2).rev() {
            let pte = unsafe { &mut (*page_table).data[va.page_num(level)] };

            if pte.is_valid() {
                page_table = unsafe { mem.page_ptr(pte.as_phys_addr()) as *mut PageTable };
            } else {
                if !alloc {
                    return None;
                }
                let pa = mem.kalloc()?;
                unsafe { mem.zero_page(pa); }
                pte.write(pa);
                page_table = unsafe { mem.page_ptr(pa) as *mut PageTable };
            }
        }
        unsafe { Some(&mut (*page_table).data[va.page_num(0)] as *mut _) }
    }

    /// Look up a virtual address, return the physical address of its page.
    /// Can only be used to look up user pages.
    pub fn walk_addr(&self, va: VirtAddr) -> Result<PhysAddr, &'static str> {
        match self.walk_raw(va, false) {
            Some(pte) => {
                let pte = unsafe { &*pte };
                if !pte.is_valid() {
                    Err("pte not valid")
                } else if !pte.is_user() {
                    Err("pte not mapped for user")
                } else {
                    Ok(pte.as_phys_addr())
                }
            }
            None => Err("va not mapped"),
        }
    }

    /// Load the user initcode into address 0 of pagetable,
    /// for the very first process.
    /// code's size must be less than a page.
    pub fn uvm_init(&mut self, code: &[u8]) {
        if code.len() >= PGSIZE {
            panic!("uvm_init: more than a page");
        }

        let mem = self.mem();
        let pa = match mem.kalloc() {
            Some(pa) => pa,
            None => panic!("uvm_init: out of memory"),
        };
        unsafe {
            mem.zero_page(pa);
            ptr::copy_nonoverlapping(code.as_ptr(), mem.page_ptr(pa), code.len());
        }
        if let Err(s) = self.map_pages(
            VirtAddr::from_const(USERTEXT),
            PGSIZE,
            pa,
            PteFlag::R | PteFlag::W | PteFlag::X | PteFlag::U,
        ) {
            panic!("uvm_init: {}", s);
        }
    }

    /// Allocate PTEs and physical memory to grow process from old_size to
    /// new_size, which need not be page aligned.
    /// Newly exposed memory is zero-filled.
    /// Returns the new size, or Err if the memory is not enough,
    /// in which case pages allocated by this call are freed again.
    pub fn uvm_alloc(&mut self, old_size: usize, new_size: usize) -> Result<usize, &'static str> {
        if new_size < old_size {
            return Ok(old_size)
        }

        let mem = self.mem();
        let mut cur_size = pg_round_up(old_size);
        while cur_size < new_size {
            let pa = match mem.kalloc() {
                Some(pa) => pa,
                None => {
                    self.uvm_dealloc(cur_size, old_size);
                    return Err("uvm_alloc: not enough physical memory")
                }
            };
            unsafe { mem.zero_page(pa); }
            let mapped = match VirtAddr::try_from(cur_size) {
                Ok(va) => self.map_pages(
                    va,
                    PGSIZE,
                    pa,
                    PteFlag::R | PteFlag::W | PteFlag::X | PteFlag::U,
                ),
                Err(s) => Err(s),
            };
            if let Err(s) = mapped {
                mem.kfree(pa);
                self.uvm_dealloc(cur_size, old_size);
                return Err(s)
            }
            cur_size += PGSIZE;
        }

        Ok(new_size)
    }

    /// Deallocate user pages to bring the process size from old_size to
    /// new_size. old_size and new_size need not be page-aligned, nor does new_size
    /// need to be less than old_size. old_size can be larger than the actual
    /// process size. Returns the new process size.
    pub fn uvm_dealloc(&mut self, old_size: usize, new_size: usize) -> usize {
        if new_size >= old_size {
            return old_size
        }

        let old = pg_round_up(old_size);
        let new = pg_round_up(new_size);
        if new < old {
            self.uvm_unmap(new, (old - new) / PGSIZE, true);
        }

        new_size
    }

    /// Remove npages of mappings starting from va. va must be
    /// page-aligned. The mappings must exist.
    /// Optionally free the physical memory.
    pub fn uvm_unmap(&mut self, va: usize, npages: usize, free: bool) {
        if va % PGSIZE != 0 {
            panic!("uvm_unmap: va={:#x} not aligned", va);
        }

        let mem = self.mem();
        for i in 0..npages {
            let cur = va + i * PGSIZE;
            let walked = match VirtAddr::try_from(cur) {
                Ok(va) => self.walk(va, false),
                Err(_) => None,
            };
            let pte = match walked {
                Some(pte) => pte,
                None => panic!("uvm_unmap: walk va={:#x}", cur),
            };
            if !pte.is_valid() {
                panic!("uvm_unmap: va={:#x} not mapped", cur);
            }
            if !pte.is_leaf() {
                panic!("uvm_unmap: va={:#x} not a leaf", cur);
            }
            let pa = pte.as_phys_addr();
            pte.write_zero();
            if free {
                mem.kfree(pa);
            }
        }
    }

    /// Mark a PTE invalid for user access.
    /// Used by exec for the user stack guard page.
    pub fn uvm_clear(&mut self, va: usize) {
        let walked = match VirtAddr::try_from(va) {
            Ok(va) => self.walk(va, false),
            Err(_) => None,
        };
        let pte = match walked {
            Some(pte) => pte,
            None => panic!("uvm_clear: va={:#x} not mapped", va),
        };
        pte.clear_flag(PteFlag::U);
    }

    /// Recursively free page-table pages.
    /// All leaf mappings must already have been removed.
    fn free_walk(&mut self) {
        free_walk(self.mem(), self.as_ptr());
    }

    /// Copy from kernel to user.
    /// Copy bytes from src to virtual address dst in this page table.
    pub fn copy_out(&mut self, mut dst: usize, src: &[u8]) -> Result<(), ()> {
        let mem = self.mem();
        let mut copied = 0;
        while copied < src.len() {
            let va0 = pg_round_down(dst);
            let pa0 = self.walk_addr(VirtAddr::try_from(va0).map_err(|_| ())?).map_err(|_| ())?;
            let off = dst - va0;
            let n = min(PGSIZE - off, src.len() - copied);
            unsafe {
                ptr::copy_nonoverlapping(
                    src.as_ptr().add(copied),
                    mem.page_ptr(pa0).add(off),
                    n,
                );
            }
            copied += n;
            dst = va0 + PGSIZE;
        }
        Ok(())
    }

    /// Copy from user to kernel.
    /// Copy dst.len() bytes to dst from virtual address src in this page table.
    pub fn copy_in(&self, mut src: usize, dst: &mut [u8]) -> Result<(), ()> {
        let mem = self.mem();
        let mut copied = 0;
        while copied < dst.len() {
            let va0 = pg_round_down(src);
            let pa0 = self.walk_addr(VirtAddr::try_from(va0).map_err(|_| ())?).map_err(|_| ())?;
            let off = src - va0;
            let n = min(PGSIZE - off, dst.len() - copied);
            unsafe {
                ptr::copy_nonoverlapping(
                    mem.page_ptr(pa0).add(off),
                    dst.as_mut_ptr().add(copied),
                    n,
                );
            }
            copied += n;
            src = va0 + PGSIZE;
        }
        Ok(())
    }

    /// Copy a null-terminated string from user to kernel.
    /// Copy bytes to dst from virtual address src in this page table,
    /// until a '\0', or the end of dst.
    pub fn copy_in_str(&self, mut src: usize, dst: &mut [u8]) -> Result<(), &'static str> {
        let mem = self.mem();
        let mut i = 0;
        while i < dst.len() {
            let va0 = pg_round_down(src);
            let pa0 = self.walk_addr(VirtAddr::try_from(va0)?)?;
            let off = src - va0;
            let n = min(PGSIZE - off, dst.len() - i);
            let page = unsafe { mem.page_ptr(pa0).add(off) };
            for j in 0..n {
                let c = unsafe { *page.add(j) };
                dst[i] = c;
                if c == 0 {
                    return Ok(())
                }
                i += 1;
            }
            src = va0 + PGSIZE;
        }
        Err("copy_in_str: no null terminator within the buffer")
    }

    /// Print the content of the page table, one line per valid pte.
    pub fn vm_print(&self) {
        println!("page table {:#x}", self.pa().as_usize());
        vm_print_level(self.mem(), self.as_ptr(), 0);
    }
}

fn free_walk(mem: &PhysMem, page_table: *mut PageTable) {
    // there are 2^9 = 512 PTEs in a page table.
    for i in 0..512 {
        let pte = unsafe { &mut (*page_table).data[i] };
        if pte.is_valid() && !pte.is_leaf() {
            // this PTE points to a lower-level page table.
            let child = pte.as_phys_addr();
            free_walk(mem, unsafe { mem.page_ptr(child) as *mut PageTable });
            pte.write_zero();
            mem.kfree(child);
        } else if pte.is_valid() {
            panic!("free_walk: leaf at index {}", i);
        }
    }
}

fn vm_print_level(mem: &PhysMem, page_table: *const PageTable, depth: usize) {
    for i in 0..512 {
        let pte = unsafe { (*page_table).data[i] };
        if !pte.is_valid() {
            continue;
        }
        for _ in 0..depth {
            print!(".. ");
        }
        println!("..{}: pte {:#x} pa {:#x} {:?}", i, pte.data, pte.as_phys_addr().as_usize(), pte.flags());
        if !pte.is_leaf() {
            vm_print_level(mem, unsafe { mem.page_ptr(pte.as_phys_addr()) as *const PageTable }, depth + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_pagetable(mem: &PhysMem) -> (PageBox<'_, PageTable>, PhysAddr) {
        let tf = mem.kalloc().unwrap();
        let pgt = PageBox::<PageTable>::alloc_proc_pagetable(mem, tf).unwrap();
        (pgt, tf)
    }

    #[test]
    fn proc_pagetable_is_freed_completely() {
        let mem = PhysMem::new(32);
        let initial = mem.free_pages();

        let (mut pgt, tf) = new_pagetable(&mem);
        let size = pgt.uvm_alloc(0, 3 * PGSIZE + 5).unwrap();
        assert_eq!(size, 3 * PGSIZE + 5);
        pgt.dealloc_proc_pagetable(size);
        mem.kfree(tf);

        assert_eq!(mem.free_pages(), initial);
    }

    #[test]
    fn uvm_alloc_zero_fills() {
        let mem = PhysMem::new(32);
        let (mut pgt, tf) = new_pagetable(&mem);
        let size = pgt.uvm_alloc(0, 2 * PGSIZE).unwrap();

        let mut buf = [0xffu8; 2 * PGSIZE];
        pgt.copy_in(0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        pgt.dealloc_proc_pagetable(size);
        mem.kfree(tf);
    }

    #[test]
    fn uvm_alloc_failure_rolls_back() {
        let mem = PhysMem::new(16);
        let (mut pgt, tf) = new_pagetable(&mem);
        let size = pgt.uvm_alloc(0, PGSIZE).unwrap();
        let before = mem.free_pages();

        assert!(pgt.uvm_alloc(size, 64 * PGSIZE).is_err());
        assert_eq!(mem.free_pages(), before);
        assert!(pgt.walk_addr(VirtAddr::try_from(PGSIZE).unwrap()).is_err());

        pgt.dealloc_proc_pagetable(size);
        mem.kfree(tf);
    }

    #[test]
    fn copy_across_pages() {
        let mem = PhysMem::new(32);
        let (mut pgt, tf) = new_pagetable(&mem);
        let size = pgt.uvm_alloc(0, 2 * PGSIZE).unwrap();

        let src: [u8; 10] = *b"crosspage!";
        let va = PGSIZE - 4;
        pgt.copy_out(va, &src).unwrap();
        let mut dst = [0u8; 10];
        pgt.copy_in(va, &mut dst).unwrap();
        assert_eq!(dst, src);

        // beyond the process size nothing is mapped
        assert!(pgt.copy_out(2 * PGSIZE - 2, &src).is_err());

        pgt.dealloc_proc_pagetable(size);
        mem.kfree(tf);
    }

    #[test]
    fn copy_in_str_needs_terminator() {
        let mem = PhysMem::new(32);
        let (mut pgt, tf) = new_pagetable(&mem);
        let size = pgt.uvm_alloc(0, PGSIZE).unwrap();
        pgt.copy_out(0x10, b"init\0").unwrap();

        let mut buf = [0u8; 8];
        pgt.copy_in_str(0x10, &mut buf).unwrap();
        assert_eq!(&buf[..5], b"init\0");

        let mut short = [0u8; 3];
        assert!(pgt.copy_in_str(0x10, &mut short).is_err());

        pgt.dealloc_proc_pagetable(size);
        mem.kfree(tf);
    }

    #[test]
    fn cleared_page_rejects_user_access() {
        let mem = PhysMem::new(32);
        let (mut pgt, tf) = new_pagetable(&mem);
        let size = pgt.uvm_alloc(0, 2 * PGSIZE).unwrap();
        pgt.uvm_clear(0);

        assert!(pgt.walk_addr(VirtAddr::try_from(0).unwrap()).is_err());
        assert!(pgt.copy_out(0, b"x").is_err());
        assert!(pgt.walk_addr(VirtAddr::try_from(PGSIZE).unwrap()).is_ok());

        pgt.dealloc_proc_pagetable(size);
        mem.kfree(tf);
    }

    #[test]
    fn trampoline_and_trapframe_are_kernel_only() {
        let mem = PhysMem::new(32);
        let (pgt, tf) = new_pagetable(&mem);
        let trapframe = VirtAddr::try_from(usize::from(TRAPFRAME)).unwrap();
        assert!(pgt.walk_addr(trapframe).is_err());
        pgt.dealloc_proc_pagetable(0);
        mem.kfree(tf);
    }

    #[test]
    #[should_panic(expected = "remap")]
    fn remap_panics() {
        let mem = PhysMem::new(32);
        let (mut pgt, _tf) = new_pagetable(&mem);
        pgt.uvm_alloc(0, PGSIZE).unwrap();
        let pa = mem.kalloc().unwrap();
        let _ = pgt.map_pages(VirtAddr::try_from(0).unwrap(), PGSIZE, pa, PteFlag::R | PteFlag::U);
    }
}
