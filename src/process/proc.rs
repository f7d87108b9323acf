use core::mem;

use crate::consts::{PGSIZE, PROC_NAME_LEN};
use crate::fs::FileSystem;
use crate::mm::{PageBox, PageTable, PhysAddr, PhysMem};
use crate::spinlock::SpinLock;

use super::syscall::{syscall_warning, Syscall, SYS_EXEC};
use super::TrapFrame;

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ProcState {
    ALLOCATED,
    RUNNABLE,
}

/// Exclusive to the process
pub struct ProcExcl {
    pub state: ProcState,
    pub pid: usize,
}

/// Data private to the process
/// Only accessed through &mut Proc, i.e., by the process itself,
/// the registers and page table are swapped with ProcExcl lock held
pub struct ProcData<'m> {
    /// size of process memory (bytes)
    sz: usize,
    name: [u8; PROC_NAME_LEN],
    /// trapframe to hold temp user register value, etc
    tf: PageBox<'m, TrapFrame>,
    /// user pagetable
    pagetable: Option<PageBox<'m, PageTable>>,
}

/// Process Struct
pub struct Proc<'m> {
    pub excl: SpinLock<ProcExcl>,
    data: ProcData<'m>,
    mem: &'m PhysMem,
}

impl<'m> Proc<'m> {
    /// Allocate a process with a trapframe and a user page table
    /// holding no user memory yet.
    /// If there is no enough memory, return None.
    pub fn alloc(mem: &'m PhysMem, pid: usize) -> Option<Self> {
        let tf = PageBox::<TrapFrame>::new(mem)?;
        let pagetable = PageBox::<PageTable>::alloc_proc_pagetable(mem, tf.pa())?;
        Some(Self {
            excl: SpinLock::new(ProcExcl { state: ProcState::ALLOCATED, pid }, "ProcExcl"),
            data: ProcData {
                sz: 0,
                name: [0; PROC_NAME_LEN],
                tf,
                pagetable: Some(pagetable),
            },
            mem,
        })
    }

    /// Set up the image of the first user process,
    /// which only calls exec("/init").
    pub fn user_init(&mut self) {
        let pd = &mut self.data;

        // map initcode in user pagetable
        pd.pagetable_mut().uvm_init(&INITCODE);
        pd.sz = PGSIZE;

        // prepare return pc and stack pointer
        pd.tf.epc = 0;
        pd.tf.sp = PGSIZE;

        self.set_name(b"initcode");
        self.excl.lock().state = ProcState::RUNNABLE;
    }

    pub fn pid(&self) -> usize {
        self.excl.lock().pid
    }

    /// Size of the user memory in bytes.
    pub fn size(&self) -> usize {
        self.data.sz
    }

    /// Display name, without the ending zeros.
    pub fn name(&self) -> &[u8] {
        let len = self.data.name.iter().position(|c| *c == 0).unwrap_or(PROC_NAME_LEN);
        &self.data.name[..len]
    }

    /// Copy name into the display name, truncated if too long.
    pub fn set_name(&mut self, name: &[u8]) {
        let count = name.len().min(PROC_NAME_LEN - 1);
        self.data.name = [0; PROC_NAME_LEN];
        self.data.name[..count].copy_from_slice(&name[..count]);
    }

    pub fn mem(&self) -> &'m PhysMem {
        self.mem
    }

    pub fn trapframe(&self) -> &TrapFrame {
        &self.data.tf
    }

    pub fn trapframe_mut(&mut self) -> &mut TrapFrame {
        &mut self.data.tf
    }

    /// Physical page of the trapframe, mapped at TRAPFRAME in every user page table.
    pub fn trapframe_pa(&self) -> PhysAddr {
        self.data.tf.pa()
    }

    pub fn pagetable(&self) -> &PageBox<'m, PageTable> {
        self.data.pagetable()
    }

    /// Copy content from src to the user's dst virtual address.
    /// It will redirect the call to pagetable.
    #[inline]
    pub fn copy_out(&mut self, dst: usize, src: &[u8]) -> Result<(), ()> {
        self.data.pagetable_mut().copy_out(dst, src)
    }

    /// Copy content from the user's src virtual address to dst.
    /// It will redirect the call to pagetable.
    #[inline]
    pub fn copy_in(&self, src: usize, dst: &mut [u8]) -> Result<(), ()> {
        self.data.pagetable().copy_in(src, dst)
    }

    /// Switch the process to a new user image in one step.
    /// The excl lock is held so that nobody inspecting the process
    /// sees the new page table with the old registers, or the reverse.
    /// Return the old page table and the old size, for the caller to free.
    pub fn install_image(
        &mut self,
        pagetable: PageBox<'m, PageTable>,
        size: usize,
        entry: usize,
        sp: usize,
    ) -> (PageBox<'m, PageTable>, usize) {
        let guard = self.excl.lock();
        let pd = &mut self.data;
        let old_pgt = match pd.pagetable.replace(pagetable) {
            Some(pgt) => pgt,
            None => panic!("install_image: process has no pagetable"),
        };
        let old_size = mem::replace(&mut pd.sz, size);
        // arguments to user main(argc, argv),
        // argc is returned via the system call return value in a0
        pd.tf.a1 = sp;
        // initial program counter = main
        pd.tf.epc = entry;
        // initial stack pointer
        pd.tf.sp = sp;
        drop(guard);
        (old_pgt, old_size)
    }

    /// Handle a system call trapped from user space.
    /// The number is in a7, the result goes back in a0.
    pub fn syscall(&mut self, fs: &FileSystem) {
        let tf = self.trapframe_mut();
        let a7 = tf.a7;
        tf.admit_ecall();
        let sys_result = match a7 {
            SYS_EXEC => self.sys_exec(fs),
            _ => {
                syscall_warning(format_args!("[{}] unknown syscall num: {}", self.pid(), a7));
                Err(())
            }
        };
        self.trapframe_mut().a0 = match sys_result {
            Ok(ret) => ret,
            Err(()) => -1isize as usize,
        };
    }

    /// Fetch a raw user virtual address from register value.
    /// Note: This raw address could be null,
    ///     and it might only be used to access user virtual address.
    #[inline]
    pub fn arg_addr(&self, n: usize) -> usize {
        self.trapframe().arg(n)
    }

    /// Fetch a null-terminated string from register pointer.
    pub fn arg_str(&self, n: usize, buf: &mut [u8]) -> Result<(), &'static str> {
        let addr = self.arg_addr(n);
        self.data.pagetable().copy_in_str(addr, buf)
    }

    /// Fetch a virtual address at virtual address `addr`.
    pub fn fetch_addr(&self, addr: usize) -> Result<usize, &'static str> {
        let word = mem::size_of::<u64>();
        match addr.checked_add(word) {
            Some(end) if end <= self.data.sz => {}
            _ => return Err("input addr > proc's mem size"),
        }
        let mut raw = [0u8; 8];
        self.copy_in(addr, &mut raw[..word])
            .map_err(|_| "pagetable copy_in error")?;
        Ok(u64::from_le_bytes(raw) as usize)
    }

    /// Fetch a null-nullterminated string from virtual address `addr` into the kernel buffer.
    pub fn fetch_str(&self, addr: usize, dst: &mut [u8]) -> Result<(), &'static str> {
        self.data.pagetable().copy_in_str(addr, dst)
    }
}

impl<'m> ProcData<'m> {
    fn pagetable(&self) -> &PageBox<'m, PageTable> {
        match self.pagetable.as_ref() {
            Some(pgt) => pgt,
            None => panic!("proc: no pagetable"),
        }
    }

    fn pagetable_mut(&mut self) -> &mut PageBox<'m, PageTable> {
        match self.pagetable.as_mut() {
            Some(pgt) => pgt,
            None => panic!("proc: no pagetable"),
        }
    }
}

impl<'m> Drop for Proc<'m> {
    /// Free the user image.
    /// The trapframe page is freed after the page table referring to it.
    fn drop(&mut self) {
        if let Some(pgt) = self.data.pagetable.take() {
            pgt.dealloc_proc_pagetable(self.data.sz);
        }
        self.data.sz = 0;
    }
}

/// first user program that calls exec("/init")
pub static INITCODE: [u8; 51] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x05, 0x02, 0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x05, 0x02,
    0x9d, 0x48, 0x73, 0x00, 0x00, 0x00, 0x89, 0x48, 0x73, 0x00, 0x00, 0x00, 0xef, 0xf0, 0xbf, 0xff,
    0x2f, 0x69, 0x6e, 0x69, 0x74, 0x00, 0x00, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_process_image() {
        let mem = PhysMem::new(32);
        let mut p = Proc::alloc(&mem, 1).unwrap();
        p.user_init();

        assert_eq!(p.size(), PGSIZE);
        assert_eq!(p.name(), b"initcode");
        assert_eq!(p.trapframe().sp, PGSIZE);
        assert_eq!(p.excl.lock().state, ProcState::RUNNABLE);

        let mut code = [0u8; 51];
        p.copy_in(0, &mut code).unwrap();
        assert_eq!(code, INITCODE);
    }

    #[test]
    fn drop_frees_everything() {
        let mem = PhysMem::new(32);
        let initial = mem.free_pages();
        {
            let mut p = Proc::alloc(&mem, 3).unwrap();
            p.user_init();
            assert!(mem.free_pages() < initial);
        }
        assert_eq!(mem.free_pages(), initial);
    }

    #[test]
    fn name_is_truncated() {
        let mem = PhysMem::new(32);
        let mut p = Proc::alloc(&mem, 3).unwrap();
        p.set_name(b"a-rather-long-program-name");
        assert_eq!(p.name(), b"a-rather-long-p");
        p.set_name(b"sh");
        assert_eq!(p.name(), b"sh");
    }

    #[test]
    fn fetch_from_user_memory() {
        let mem = PhysMem::new(32);
        let mut p = Proc::alloc(&mem, 3).unwrap();
        p.user_init();

        p.copy_out(0x100, &0x1234u64.to_le_bytes()).unwrap();
        p.copy_out(0x200, b"/init\0").unwrap();
        assert_eq!(p.fetch_addr(0x100), Ok(0x1234));
        assert!(p.fetch_addr(PGSIZE - 4).is_err());
        assert!(p.fetch_addr(usize::MAX - 2).is_err());

        let mut buf = [0u8; 8];
        p.fetch_str(0x200, &mut buf).unwrap();
        assert_eq!(&buf[..6], b"/init\0");

        p.trapframe_mut().a1 = 0x200;
        let mut buf = [0u8; 8];
        p.arg_str(1, &mut buf).unwrap();
        assert_eq!(&buf[..5], b"/init");
    }

    #[test]
    fn unknown_syscall_fails() {
        let mem = PhysMem::new(32);
        let fs = FileSystem::new();
        let mut p = Proc::alloc(&mem, 3).unwrap();
        p.user_init();
        p.trapframe_mut().a7 = 99;
        p.syscall(&fs);
        assert_eq!(p.trapframe().a0, -1isize as usize);
        assert_eq!(p.trapframe().epc, 4);
    }

    #[test]
    fn alloc_fails_without_memory() {
        let mem = PhysMem::new(3);
        // trapframe and root fit, the lower-level tables do not
        assert!(Proc::alloc(&mem, 3).is_none());
        assert_eq!(mem.free_pages(), 2);
    }
}
