//! Memory layout
//!
//! the kernel expects there to be RAM
//! for use by the kernel and user pages
//! from physical address 0x80000000 to PHYSTOP.
//!
//! a user address space looks like this, from zero upwards:
//!     text
//!     original data and bss
//!     fixed-size stack guard page
//!     fixed-size stack
//!     ...
//!     TRAPFRAME (p->trapframe, used by the trampoline)
//!     TRAMPOLINE (the same page as in the kernel)

use super::*;

pub const KERNBASE: ConstAddr = ConstAddr(0x80000000);
pub const PHYSTOP: ConstAddr = KERNBASE.const_add(128 * 1024 * 1024);

/// map the trampoline page to the highest address,
/// in both user and kernel space.
/// 0x3FFFFFF000
pub const TRAMPOLINE: ConstAddr = MAXVA.const_sub(PGSIZE);

/// trapframe is below the trampoline
/// 0x3FFFFFE000
pub const TRAPFRAME: ConstAddr = TRAMPOLINE.const_sub(PGSIZE);

/// user text/code start address
pub const USERTEXT: ConstAddr = ConstAddr(0);
