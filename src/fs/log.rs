//! File system transaction demarcation.
//!
//! Every system call that touches the file system wraps its work in
//! begin_op()/end_op(). The on-disk logging itself belongs to the disk
//! layer, here only the outstanding operations are tracked, and a commit
//! happens once the last of them ends.

use crate::spinlock::SpinLock;

pub struct Log(SpinLock<LogInner>);

struct LogInner {
    /// how many FS sys calls are executing
    outstanding: usize,
    /// how many times the log has been committed
    commits: usize,
}

impl Log {
    pub const fn new() -> Self {
        Self(SpinLock::new(LogInner { outstanding: 0, commits: 0 }, "log"))
    }

    /// Called at the start of each FS system call.
    pub fn begin_op(&self) {
        let mut guard = self.0.lock();
        guard.outstanding += 1;
        drop(guard);
    }

    /// Called at the end of each FS system call.
    /// Commits if this was the last outstanding operation.
    pub fn end_op(&self) {
        let mut guard = self.0.lock();
        if guard.outstanding == 0 {
            panic!("log: end_op without begin_op");
        }
        guard.outstanding -= 1;
        if guard.outstanding == 0 {
            guard.commits += 1;
        }
        drop(guard);
    }

    pub fn outstanding(&self) -> usize {
        self.0.lock().outstanding
    }

    pub fn commits(&self) -> usize {
        self.0.lock().commits
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_after_last_op() {
        let log = Log::new();
        log.begin_op();
        log.begin_op();
        log.end_op();
        assert_eq!(log.commits(), 0);
        log.end_op();
        assert_eq!(log.outstanding(), 0);
        assert_eq!(log.commits(), 1);
    }

    #[test]
    #[should_panic(expected = "end_op without begin_op")]
    fn unbalanced_end_op() {
        Log::new().end_op();
    }
}
