use array_macro::array;

use alloc::boxed::Box;
#[cfg(feature = "trace_syscall")]
use alloc::string::String;
use core::fmt::Display;
use core::mem;

use crate::consts::{MAXARG, MAXARGLEN, MAXPATH};
use crate::fs::FileSystem;

use super::{exec, ExecError, Proc};

pub type SysResult = Result<usize, ()>;

/// System call number of exec
pub const SYS_EXEC: usize = 7;

pub trait Syscall {
    fn sys_exec(&mut self, fs: &FileSystem) -> SysResult;
}

impl<'m> Syscall for Proc<'m> {
    /// Load an elf file and execute it with arguments.
    /// a0 holds the path, a1 the user address of a zero-ended array of argument pointers.
    fn sys_exec(&mut self, fs: &FileSystem) -> SysResult {
        let mut path: [u8; MAXPATH] = [0; MAXPATH];
        self.arg_str(0, &mut path).map_err(syscall_warning)?;

        let mut result: SysResult = Err(());
        let mut error = "too many arguments";
        let mut exec_error: Option<ExecError> = None;
        let mut uarg: usize;
        let uargv = self.arg_addr(1);
        let mut argv: [Option<Box<[u8; MAXARGLEN]>>; MAXARG] = array![_ => None; MAXARG];
        // one more round than MAXARG, to find the ending zero
        for i in 0..=MAXARG {
            // fetch ith arg's address into uarg
            let uaddr = match i.checked_mul(mem::size_of::<u64>()).and_then(|off| uargv.checked_add(off)) {
                Some(uaddr) => uaddr,
                None => {
                    error = "bad argv address";
                    break
                }
            };
            match self.fetch_addr(uaddr) {
                Ok(addr) => uarg = addr,
                Err(s) => {
                    error = s;
                    break
                },
            }
            if uarg == 0 {
                let mut args: [&[u8]; MAXARG] = [&[]; MAXARG];
                for (arg, buf) in args.iter_mut().zip(argv[..i].iter()) {
                    if let Some(buf) = buf.as_deref() {
                        let len = buf.iter().position(|c| *c == 0).unwrap_or(MAXARGLEN);
                        *arg = &buf[..len];
                    }
                }
                match exec(self, fs, &path, &args[..i]) {
                    Ok(ret) => result = Ok(ret),
                    Err(e) => exec_error = Some(e),
                }
                break
            }
            if i == MAXARG {
                break
            }

            // copy user arg into kernel space
            let buf = argv[i].insert(Box::new([0; MAXARGLEN]));
            if let Err(s) = self.fetch_str(uarg, &mut buf[..]) {
                error = s;
                break
            }
        }

        #[cfg(feature = "trace_syscall")]
        println!("[{}].exec({}, {:#x}) = {:?}", self.pid(), String::from_utf8_lossy(&path), uargv, result);

        if result.is_err() {
            match exec_error {
                Some(e) => syscall_warning(e),
                None => syscall_warning(error),
            }
        }
        result
    }
}

#[inline]
pub(super) fn syscall_warning<T: Display>(s: T) {
    #[cfg(feature = "kernel_warning")]
    println!("syscall warning: {}", s);
    #[cfg(not(feature = "kernel_warning"))]
    let _ = s;
}

#[cfg(test)]
mod tests {
    use alloc::vec::Vec;

    use super::*;
    use crate::console::capture;
    use crate::consts::PGSIZE;
    use crate::mm::PhysMem;
    use crate::process::elf::build::ElfBuilder;

    const UARGV: usize = 0x300;

    /// The first process, with "/init" at 0x200 and argv pointing at the given strings.
    fn user_exec<'m>(mem: &'m PhysMem, args: &[&[u8]]) -> Proc<'m> {
        let mut p = Proc::alloc(mem, 2).unwrap();
        p.user_init();
        p.copy_out(0x200, b"/init\0").unwrap();

        let mut strs = 0x800;
        let mut ptrs = Vec::new();
        for arg in args {
            p.copy_out(strs, arg).unwrap();
            p.copy_out(strs + arg.len(), &[0]).unwrap();
            ptrs.push(strs as u64);
            strs += 0x40;
        }
        ptrs.push(0);
        for (i, ptr) in ptrs.iter().enumerate() {
            p.copy_out(UARGV + 8 * i, &ptr.to_le_bytes()).unwrap();
        }

        let tf = p.trapframe_mut();
        tf.a7 = SYS_EXEC;
        tf.a0 = 0x200;
        tf.a1 = UARGV;
        p
    }

    fn init_fs() -> FileSystem {
        let fs = FileSystem::new();
        fs.create(b"/init", &ElfBuilder::new(0x10).load(0, &[0x13; 32], 32).build())
            .unwrap();
        fs
    }

    #[test]
    fn exec_through_syscall() {
        let mem = PhysMem::new(64);
        let fs = init_fs();
        let mut p = user_exec(&mem, &[b"init", b"-v"]);

        p.syscall(&fs);

        let tf = *p.trapframe();
        assert_eq!(tf.a0, 2);
        assert_eq!(tf.epc, 0x10);
        assert_eq!(tf.a1, tf.sp);
        assert_eq!(p.name(), b"init");
        assert_eq!(p.size(), 3 * PGSIZE);
    }

    #[test]
    fn exec_with_max_args() {
        let mem = PhysMem::new(64);
        let fs = init_fs();
        let args: Vec<&[u8]> = (0..MAXARG).map(|_| &b"a"[..]).collect();
        let mut p = user_exec(&mem, &args);

        p.syscall(&fs);
        assert_eq!(p.trapframe().a0, MAXARG);
    }

    #[test]
    fn too_many_user_args() {
        let mem = PhysMem::new(64);
        let fs = init_fs();
        let args: Vec<&[u8]> = (0..=MAXARG).map(|_| &b"a"[..]).collect();
        let mut p = user_exec(&mem, &args);
        let size = p.size();

        p.syscall(&fs);
        assert_eq!(p.trapframe().a0, -1isize as usize);
        assert_eq!(p.size(), size);
        assert_eq!(p.name(), b"initcode");
    }

    #[test]
    fn failed_exec_returns_minus_one() {
        let mem = PhysMem::new(64);
        let fs = FileSystem::new();
        let mut p = user_exec(&mem, &[b"init"]);
        let free = mem.free_pages();

        p.syscall(&fs);
        assert_eq!(p.trapframe().a0, -1isize as usize);
        // the process goes on after the ecall
        assert_eq!(p.trapframe().epc, 4);
        assert_eq!(mem.free_pages(), free);
    }

    #[test]
    fn failed_exec_warns_once() {
        let mem = PhysMem::new(64);
        let fs = FileSystem::new();
        let mut p = user_exec(&mem, &[b"init"]);

        capture::start();
        p.syscall(&fs);
        let out = capture::take();
        if cfg!(feature = "kernel_warning") {
            assert_eq!(out.matches("syscall warning").count(), 1);
            assert!(out.contains(&format!("syscall warning: {}", ExecError::NotFound)));
        } else {
            assert!(!out.contains("syscall warning"));
        }
    }

    #[test]
    fn bad_argv_pointer() {
        let mem = PhysMem::new(64);
        let fs = init_fs();
        let mut p = user_exec(&mem, &[b"init"]);
        p.trapframe_mut().a1 = PGSIZE - 4;

        p.syscall(&fs);
        assert_eq!(p.trapframe().a0, -1isize as usize);
    }
}
