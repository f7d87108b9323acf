//! File system
//!
//! Only what exec needs from the file system lives here:
//! path lookup, locked reads at an offset, and transaction demarcation.

mod inode;
mod log;

pub use inode::{Inode, InodeCache, InodeData};
pub use log::Log;

pub struct FileSystem {
    pub log: Log,
    pub icache: InodeCache,
}

impl FileSystem {
    pub fn new() -> Self {
        Self {
            log: Log::new(),
            icache: InodeCache::new(),
        }
    }

    /// Install a file, as mkfs does when it builds the disk image.
    pub fn create(&self, path: &[u8], content: &[u8]) -> Result<(), &'static str> {
        self.log.begin_op();
        let ret = self.icache.create(path, content);
        self.log.end_op();
        ret
    }
}
