/// memory design
pub const PGSIZE: usize = 4096;
pub const PGSHIFT: usize = 12;
pub const PGMASK: usize = 0x1FF;
pub const PGMASKLEN: usize = 9;

/// for syscall
/// maximum length of a file system path
pub const MAXPATH: usize = 128;
/// maximum number of command line arguments
pub const MAXARG: usize = 16;
/// maximum length of a single command line argument
pub const MAXARGLEN: usize = 64;

/// number of inodes in inode cache
pub const NINODE: usize = 50;

/// length of a process's display name, including the ending zero
pub const PROC_NAME_LEN: usize = 16;

/// user stack pointer must be 16-byte aligned on riscv
pub const STACK_ALIGN: usize = 16;
