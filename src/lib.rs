//! exec for an xv6-style kernel on riscv64 (Sv39).
//!
//! Loads an elf executable into a fresh user address space,
//! lays out argc/argv on a new user stack,
//! and swaps the image into the calling process only once all of that worked.

#![cfg_attr(not(test), no_std)]
#![warn(rust_2018_idioms)]

#[macro_use]
extern crate bitflags;

extern crate alloc;

#[macro_use]
pub mod printf;

pub mod console;
pub mod consts;
pub mod fs;
pub mod mm;
pub mod process;
pub mod sleeplock;
pub mod spinlock;

pub use fs::FileSystem;
pub use mm::PhysMem;
pub use process::{exec, ExecError, Proc, Syscall};
