//! Console output.
//!
//! The uart driver lives outside this crate.
//! Whoever brings the hardware up installs a byte sink here,
//! until then console output is discarded.

use crate::spinlock::SpinLock;

static SINK: SpinLock<Option<fn(u8)>> = SpinLock::new(None, "console");

/// Install the function that puts one byte onto the console device.
pub fn set_sink(putc: fn(u8)) {
    *SINK.lock() = Some(putc);
}

pub fn consputc(c: u8) {
    let putc = *SINK.lock();
    if let Some(putc) = putc {
        putc(c);
    }
}

/// Console sink that keeps what each thread prints, for tests to look at.
#[cfg(test)]
pub(crate) mod capture {
    use alloc::string::String;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    std::thread_local! {
        static OUTPUT: RefCell<Vec<u8>> = RefCell::new(Vec::new());
    }

    fn putc(c: u8) {
        OUTPUT.with(|out| out.borrow_mut().push(c));
    }

    /// Route console output into the buffer of the printing thread,
    /// and empty the buffer of this one.
    pub fn start() {
        super::set_sink(putc);
        OUTPUT.with(|out| out.borrow_mut().clear());
    }

    /// Everything this thread printed since start().
    pub fn take() -> String {
        let bytes = OUTPUT.with(|out| core::mem::take(&mut *out.borrow_mut()));
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
