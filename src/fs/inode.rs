//! Inode-relevant operations
//!
//! Inodes are found by their full path in a flat cache,
//! and their content is kept in memory.

use alloc::vec::Vec;
use core::cmp::min;
use core::convert::TryFrom;

use array_macro::array;

use crate::consts::{MAXPATH, NINODE};
use crate::sleeplock::{SleepLock, SleepLockGuard};
use crate::spinlock::SpinLock;

pub struct InodeCache {
    meta: SpinLock<[InodeMeta; NINODE]>,
    data: [SleepLock<InodeData>; NINODE],
}

impl InodeCache {
    pub fn new() -> Self {
        Self {
            meta: SpinLock::new(array![_ => InodeMeta::new(); NINODE], "InodeMeta"),
            data: array![_ => SleepLock::new(InodeData::new(), "InodeData"); NINODE],
        }
    }

    /// Create a file at path holding content,
    /// or replace the content if the file already exists.
    pub fn create(&self, path: &[u8], content: &[u8]) -> Result<(), &'static str> {
        let mut name = [0u8; MAXPATH];
        let len = normalize(path, &mut name).ok_or("inode: bad path")?;
        if len == 0 {
            return Err("inode: cannot create the root")
        }

        let mut guard = self.meta.lock();
        let index = match guard.iter().position(|m| m.valid && m.name() == &name[..len]) {
            Some(i) => i,
            None => {
                let i = guard.iter().position(|m| !m.valid).ok_or("inode: not enough")?;
                guard[i].valid = true;
                guard[i].name = name;
                guard[i].len = len;
                i
            }
        };
        drop(guard);

        let mut idata = self.data[index].lock();
        idata.content.clear();
        idata.content.extend_from_slice(content);
        drop(idata);
        Ok(())
    }

    /// Look up the inode for the path name.
    /// The returned handle holds a reference to the cache entry.
    pub fn namei(&self, path: &[u8]) -> Option<Inode<'_>> {
        let mut name = [0u8; MAXPATH];
        let len = normalize(path, &mut name)?;

        let mut guard = self.meta.lock();
        let index = guard.iter().position(|m| m.valid && m.name() == &name[..len])?;
        guard[index].refs += 1;
        drop(guard);
        Some(Inode { cache: self, index })
    }

    /// Clone an inode by just increment its reference count by 1.
    fn dup(&self, inode: &Inode<'_>) {
        let mut guard = self.meta.lock();
        guard[inode.index].refs += 1;
    }

    /// Done with this inode.
    /// It should only be called by the Drop impl of [`Inode`].
    fn put(&self, inode: &Inode<'_>) {
        let mut guard = self.meta.lock();
        if guard[inode.index].refs == 0 {
            panic!("inode: put with no reference");
        }
        guard[inode.index].refs -= 1;
    }

    /// Number of handles currently referring to path.
    #[cfg(test)]
    pub(crate) fn refs(&self, path: &[u8]) -> usize {
        let mut name = [0u8; MAXPATH];
        let len = normalize(path, &mut name).unwrap();
        let guard = self.meta.lock();
        guard.iter()
            .find(|m| m.valid && m.name() == &name[..len])
            .map_or(0, |m| m.refs)
    }
}

/// Inode handed out by inode cache.
/// It is actually a handle pointing to the cache.
pub struct Inode<'a> {
    cache: &'a InodeCache,
    index: usize,
}

impl<'a> Clone for Inode<'a> {
    fn clone(&self) -> Self {
        self.cache.dup(self);
        Self {
            cache: self.cache,
            index: self.index,
        }
    }
}

impl<'a> Inode<'a> {
    /// Lock the inode for exclusive access to its content.
    pub fn lock(&self) -> SleepLockGuard<'a, InodeData> {
        self.cache.data[self.index].lock()
    }

    /// Whether some guard currently holds this inode's lock.
    #[cfg(test)]
    pub(crate) fn is_locked(&self) -> bool {
        self.cache.data[self.index].holding()
    }
}

impl<'a> Drop for Inode<'a> {
    /// Done with this inode.
    fn drop(&mut self) {
        self.cache.put(self);
    }
}

struct InodeMeta {
    /// whether this slot holds a file
    valid: bool,
    /// normalized path, i.e., components joined by single '/'
    name: [u8; MAXPATH],
    len: usize,
    /// reference count
    refs: usize,
}

impl InodeMeta {
    const fn new() -> Self {
        Self {
            valid: false,
            name: [0; MAXPATH],
            len: 0,
            refs: 0,
        }
    }

    fn name(&self) -> &[u8] {
        &self.name[..self.len]
    }
}

/// In-memory copy of an inode's content
pub struct InodeData {
    content: Vec<u8>,
}

impl InodeData {
    const fn new() -> Self {
        Self {
            content: Vec::new(),
        }
    }

    pub fn size(&self) -> u32 {
        min(self.content.len(), u32::MAX as usize) as u32
    }

    /// Read dst.len() bytes of the inode content starting at offset.
    /// Fails, copying nothing, if the range runs past the end of the file.
    pub fn read(&mut self, dst: &mut [u8], offset: u32) -> Result<(), ()> {
        // check the reading content is in range
        let count = u32::try_from(dst.len()).map_err(|_| ())?;
        let end = offset.checked_add(count).ok_or(())?;
        if end > self.size() {
            return Err(())
        }

        let offset = offset as usize;
        dst.copy_from_slice(&self.content[offset..offset + dst.len()]);
        Ok(())
    }
}

/// Write path into buf with empty and "." elements dropped,
/// e.g., "//bin/./ls" becomes "bin/ls". The path ends at its first '\0'.
/// Returns the length written, or None if buf is too small.
fn normalize(path: &[u8], buf: &mut [u8]) -> Option<usize> {
    let path = match path.iter().position(|c| *c == 0) {
        Some(end) => &path[..end],
        None => path,
    };

    let mut len = 0;
    for elem in path.split(|c| *c == b'/') {
        if elem.is_empty() || elem == b"." {
            continue;
        }
        let sep = if len > 0 { 1 } else { 0 };
        if len + sep + elem.len() > buf.len() {
            return None
        }
        if sep > 0 {
            buf[len] = b'/';
            len += 1;
        }
        buf[len..len + elem.len()].copy_from_slice(elem);
        len += elem.len();
    }
    Some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_path() {
        let mut buf = [0u8; 16];
        let len = normalize(b"//bin/./ls\0garbage", &mut buf).unwrap();
        assert_eq!(&buf[..len], b"bin/ls");
        assert_eq!(normalize(b"/", &mut buf), Some(0));
        assert!(normalize(b"/a-very-long-component-name", &mut buf).is_none());
    }

    #[test]
    fn lookup_and_refs() {
        let icache = InodeCache::new();
        icache.create(b"/bin/init", b"hello").unwrap();
        assert!(icache.namei(b"/bin/missing").is_none());

        let ip = icache.namei(b"bin//init").unwrap();
        let ip2 = ip.clone();
        assert_eq!(icache.refs(b"/bin/init"), 2);
        drop(ip2);
        drop(ip);
        assert_eq!(icache.refs(b"/bin/init"), 0);
    }

    #[test]
    fn read_in_range_only() {
        let icache = InodeCache::new();
        icache.create(b"/f", b"0123456789").unwrap();
        let ip = icache.namei(b"/f").unwrap();
        let mut idata = ip.lock();
        assert!(ip.is_locked());

        let mut buf = [0u8; 4];
        idata.read(&mut buf, 6).unwrap();
        assert_eq!(&buf, b"6789");
        assert!(idata.read(&mut buf, 7).is_err());
        assert!(idata.read(&mut buf, u32::MAX).is_err());
        drop(idata);
        assert!(!ip.is_locked());
    }

    #[test]
    fn create_replaces_content() {
        let icache = InodeCache::new();
        icache.create(b"/f", b"old content").unwrap();
        icache.create(b"/f", b"new").unwrap();
        let ip = icache.namei(b"/f").unwrap();
        assert_eq!(ip.lock().size(), 3);
    }
}
