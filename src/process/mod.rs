//! Processes and the exec system call

mod elf;
mod exec;
mod proc;
mod syscall;
mod trapframe;

pub use exec::{exec, ExecError};
pub use proc::{Proc, ProcExcl, ProcState, INITCODE};
pub use syscall::{SysResult, Syscall, SYS_EXEC};
pub use trapframe::TrapFrame;
