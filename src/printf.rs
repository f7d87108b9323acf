use crate::console;
use crate::spinlock::SpinLock;
use core::fmt;

/// Writer that puts formatted bytes onto the console.
struct Pr;

impl fmt::Write for Pr {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            console::consputc(byte);
        }
        Ok(())
    }
}

/// serialize lines printed from different harts
static PR_LOCK: SpinLock<()> = SpinLock::new((), "pr");

/// used only in printf's print macro
///
/// note: it needs to be pub because it is used in macro_rules,
///     which access this fn from the crate-level
pub fn _print(args: fmt::Arguments<'_>) {
    use fmt::Write;

    let guard = PR_LOCK.lock();
    // the console never reports an error
    let _ = Pr.write_fmt(args);
    drop(guard);
}

#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::printf::_print(format_args!($($arg)*));
    };
}

#[macro_export]
macro_rules! println {
    () => {$crate::print!("\n")};
    ($fmt:expr) => {$crate::print!(concat!($fmt, "\n"))};
    ($fmt:expr, $($arg:tt)*) => {
        $crate::print!(concat!($fmt, "\n"), $($arg)*)
    };
}
