pub use addr::{pg_round_down, pg_round_up, Addr, PhysAddr, VirtAddr};
pub use boxed::{PageAligned, PageBox};
pub use kalloc::PhysMem;
pub use pagetable::{PageTable, PteFlag};

mod addr;
mod boxed;
mod kalloc;
mod pagetable;
