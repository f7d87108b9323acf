//! Replace the user image of a process with an elf executable.
//!
//! The new address space is built aside from the process,
//! and only attached to it once every step has succeeded.
//! On failure the partial image is torn down by [`ExecImage`]'s drop,
//! so the process keeps running its old image.

use core::cmp::min;
use core::convert::TryFrom;
use core::mem;
use core::slice;

use thiserror::Error;

use crate::consts::{MAXARG, PGSIZE, STACK_ALIGN, TRAPFRAME};
use crate::fs::{FileSystem, InodeCache, InodeData};
use crate::mm::{pg_round_up, PageBox, PageTable, PhysAddr, PhysMem, VirtAddr};

use super::elf::{self, ProgHeader, ELF_PROG_LOAD};
use super::Proc;

/// Reasons for an exec to fail.
/// The calling process is left untouched by any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("no such executable")]
    NotFound,
    #[error("short read: {0}")]
    Io(&'static str),
    #[error("bad elf magic number")]
    Format,
    #[error("out of bounds: {0}")]
    Bounds(&'static str),
    #[error("out of memory: {0}")]
    Alloc(&'static str),
}

/// Load the executable at path into the process p,
/// with argv as the arguments to its main.
/// Returns argc, which the caller places in a0.
pub fn exec<'m>(
    p: &mut Proc<'m>,
    fs: &FileSystem,
    path: &[u8],
    argv: &[&[u8]],
) -> Result<usize, ExecError> {
    let argc = argv.len();
    if argc > MAXARG {
        return Err(ExecError::Bounds("too many arguments"))
    }

    fs.log.begin_op();
    let loaded = load_image(p.mem(), p.trapframe_pa(), &fs.icache, path);
    fs.log.end_op();
    let (mut image, entry) = loaded?;

    let stack_top = image.build_stack()?;
    let sp = image.push_args(stack_top, argv)?;

    // commit to the user image
    let size = image.size;
    let (old_pgt, old_size) = p.install_image(image.commit(), size, entry, sp);
    old_pgt.dealloc_proc_pagetable(old_size);

    // save program name for debugging
    p.set_name(last_elem(path));

    if p.pid() == 1 {
        p.pagetable().vm_print();
    }

    Ok(argc)
}

/// Read the elf file at path into a new image.
/// Returns the image and its entry address.
fn load_image<'m>(
    mem: &'m PhysMem,
    trapframe: PhysAddr,
    icache: &InodeCache,
    path: &[u8],
) -> Result<(ExecImage<'m>, usize), ExecError> {
    let inode = icache.namei(path).ok_or(ExecError::NotFound)?;
    let mut idata = inode.lock();

    let elf = elf::read_header(&mut idata)?;
    let mut image = ExecImage::new(mem, trapframe)?;

    // load each program section
    let stride = u64::from(elf.phentsize);
    for i in 0..u64::from(elf.phnum) {
        let off = stride
            .checked_mul(i)
            .and_then(|off| off.checked_add(elf.phoff))
            .and_then(|off| u32::try_from(off).ok())
            .ok_or(ExecError::Io("program header beyond the file"))?;
        let ph = ProgHeader::read(&mut idata, off)?;
        if ph.pg_type != ELF_PROG_LOAD {
            continue;
        }
        image.load_segment(&mut idata, &ph)?;
    }
    drop(idata);
    drop(inode);

    Ok((image, elf.entry as usize))
}

/// A user image under construction.
///
/// Owns the new page table until commit().
/// Dropping an uncommitted image frees every page of it.
struct ExecImage<'m> {
    pagetable: Option<PageBox<'m, PageTable>>,
    /// high-water mark of the mapped user memory
    size: usize,
}

impl<'m> ExecImage<'m> {
    fn new(mem: &'m PhysMem, trapframe: PhysAddr) -> Result<Self, ExecError> {
        let pagetable = PageBox::<PageTable>::alloc_proc_pagetable(mem, trapframe)
            .ok_or(ExecError::Alloc("cannot allocate page table"))?;
        Ok(Self {
            pagetable: Some(pagetable),
            size: 0,
        })
    }

    fn pagetable(&mut self) -> &mut PageBox<'m, PageTable> {
        match self.pagetable.as_mut() {
            Some(pgt) => pgt,
            None => panic!("exec: image already committed"),
        }
    }

    /// Grow the image to cover the segment, then copy its file content in.
    fn load_segment(&mut self, idata: &mut InodeData, ph: &ProgHeader) -> Result<(), ExecError> {
        if ph.memsz < ph.filesz {
            return Err(ExecError::Bounds("segment memsz less than filesz"))
        }
        let end = ph.vaddr
            .checked_add(ph.memsz)
            .ok_or(ExecError::Bounds("segment end overflows"))?;
        if ph.vaddr % (PGSIZE as u64) != 0 {
            return Err(ExecError::Bounds("segment vaddr not page aligned"))
        }
        if end > usize::from(TRAPFRAME) as u64 {
            return Err(ExecError::Bounds("segment beyond user memory"))
        }

        let old_size = self.size;
        self.size = self.pagetable()
            .uvm_alloc(old_size, end as usize)
            .map_err(ExecError::Alloc)?;

        self.load_seg(idata, ph.vaddr as usize, ph.off, ph.filesz)
    }

    /// Copy size bytes at offset of the file to va, page by page.
    /// [va, va+size) must already be mapped.
    fn load_seg(
        &mut self,
        idata: &mut InodeData,
        va: usize,
        offset: u64,
        size: u64,
    ) -> Result<(), ExecError> {
        let offset = u32::try_from(offset).map_err(|_| ExecError::Io("segment beyond the file"))?;
        let size = u32::try_from(size).map_err(|_| ExecError::Io("segment beyond the file"))?;

        let pgt = self.pagetable();
        let mem = pgt.mem();
        for i in (0..size).step_by(PGSIZE) {
            let cur = va + i as usize;
            let pa = match VirtAddr::try_from(cur) {
                Ok(va) => pgt.walk_addr(va),
                Err(s) => Err(s),
            };
            let pa = match pa {
                Ok(pa) => pa,
                Err(s) => panic!("load_seg: va={:#x} should already be mapped, {}", cur, s),
            };
            let n = min(size - i, PGSIZE as u32) as usize;
            // the page was mapped by uvm_alloc and belongs to this image
            let dst = unsafe { slice::from_raw_parts_mut(mem.page_ptr(pa), n) };
            let off = offset.checked_add(i).ok_or(ExecError::Io("segment beyond the file"))?;
            idata.read(dst, off).map_err(|_| ExecError::Io("cannot read elf segment"))?;
        }

        Ok(())
    }

    /// Allocate two pages at the next page boundary,
    /// the lower one as a guard, the upper one as the user stack.
    /// Returns the top of the stack.
    fn build_stack(&mut self) -> Result<usize, ExecError> {
        let base = pg_round_up(self.size);
        if base + 2 * PGSIZE > usize::from(TRAPFRAME) {
            return Err(ExecError::Bounds("no room for the user stack"))
        }
        self.size = self.pagetable()
            .uvm_alloc(base, base + 2 * PGSIZE)
            .map_err(|_| ExecError::Alloc("cannot allocate user stack"))?;
        self.pagetable().uvm_clear(base);
        Ok(self.size)
    }

    /// Push argument strings, then the argv pointer array, onto the stack.
    /// Returns the final stack pointer, which is also argv.
    fn push_args(&mut self, stack_top: usize, argv: &[&[u8]]) -> Result<usize, ExecError> {
        let argc = argv.len();
        if argc > MAXARG {
            return Err(ExecError::Bounds("too many arguments"))
        }
        let stack_base = stack_top - PGSIZE;
        let mut sp = stack_top;
        let mut ustack = [0usize; MAXARG + 1];

        for (i, arg) in argv.iter().enumerate() {
            let arg = match arg.iter().position(|c| *c == 0) {
                Some(len) => &arg[..len],
                None => arg,
            };
            sp = stack_push(sp, arg.len() + 1, stack_base)?;
            let pgt = self.pagetable();
            pgt.copy_out(sp, arg)
                .and_then(|_| pgt.copy_out(sp + arg.len(), &[0]))
                .map_err(|_| ExecError::Bounds("argument off the user stack"))?;
            ustack[i] = sp;
        }
        debug_assert_eq!(ustack[argc], 0);

        // push the array of argv[] pointers, ending with a zero
        let word = mem::size_of::<u64>();
        let mut raw = [0u8; (MAXARG + 1) * 8];
        for (i, ptr) in ustack[..=argc].iter().enumerate() {
            raw[i * word..(i + 1) * word].copy_from_slice(&(*ptr as u64).to_le_bytes());
        }
        let count = (argc + 1) * word;
        sp = stack_push(sp, count, stack_base)?;
        self.pagetable()
            .copy_out(sp, &raw[..count])
            .map_err(|_| ExecError::Bounds("argv off the user stack"))?;

        Ok(sp)
    }

    /// Hand the page table over to the process.
    fn commit(mut self) -> PageBox<'m, PageTable> {
        match self.pagetable.take() {
            Some(pgt) => pgt,
            None => panic!("exec: image already committed"),
        }
    }
}

impl<'m> Drop for ExecImage<'m> {
    fn drop(&mut self) {
        if let Some(pgt) = self.pagetable.take() {
            pgt.dealloc_proc_pagetable(self.size);
        }
    }
}

/// Move sp down by count bytes and align it.
/// Fails if the result is under stack_base.
#[inline]
fn stack_push(sp: usize, count: usize, stack_base: usize) -> Result<usize, ExecError> {
    match sp.checked_sub(count) {
        Some(sp) if sp - sp % STACK_ALIGN >= stack_base => Ok(sp - sp % STACK_ALIGN),
        _ => Err(ExecError::Bounds("arguments overflow the user stack")),
    }
}

/// The last element of path, i.e., what follows the last '/'.
fn last_elem(path: &[u8]) -> &[u8] {
    let path = match path.iter().position(|c| *c == 0) {
        Some(end) => &path[..end],
        None => path,
    };
    match path.iter().rposition(|c| *c == b'/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}
