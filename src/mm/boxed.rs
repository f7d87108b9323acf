//! Box-like owner of one physical page
//! some details are different from alloc::boxed::Box,
//! e.g., the memory comes from PhysMem instead of the heap

use core::marker::PhantomData;
use core::mem;
use core::ops::{Deref, DerefMut};

use super::{PhysAddr, PhysMem};

/// Types that fit in one page and may be placed at its start.
///
/// SAFETY: a page of zero bytes must be a valid value of the type.
pub unsafe trait PageAligned {}

pub struct PageBox<'m, T: PageAligned> {
    mem: &'m PhysMem,
    pa: PhysAddr,
    _marker: PhantomData<T>,
}

impl<'m, T: PageAligned> PageBox<'m, T> {
    /// Allocate a zeroed page holding a T.
    /// Returns None if there is no free page.
    pub fn new(mem: &'m PhysMem) -> Option<Self> {
        debug_assert!(mem::size_of::<T>() <= crate::consts::PGSIZE);
        let pa = mem.kalloc()?;
        unsafe { mem.zero_page(pa); }
        Some(Self {
            mem,
            pa,
            _marker: PhantomData,
        })
    }

    /// Physical address of the owned page.
    #[inline]
    pub fn pa(&self) -> PhysAddr {
        self.pa
    }

    /// The physical memory the page belongs to.
    #[inline]
    pub fn mem(&self) -> &'m PhysMem {
        self.mem
    }

    #[inline]
    pub(super) fn as_ptr(&self) -> *mut T {
        unsafe { self.mem.page_ptr(self.pa) as *mut T }
    }
}

impl<'m, T: PageAligned> Deref for PageBox<'m, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.as_ptr() }
    }
}

impl<'m, T: PageAligned> DerefMut for PageBox<'m, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.as_ptr() }
    }
}

impl<'m, T: PageAligned> Drop for PageBox<'m, T> {
    fn drop(&mut self) {
        self.mem.kfree(self.pa);
    }
}
