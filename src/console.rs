//! Bridge to the external display sink.
//!
//! The text-mode terminal lives outside this core; it hands us two
//! synchronous, non-blocking operations (character write and cursor
//! retreat) as a [`ConsoleOps`] function table. Registration happens once
//! at boot; anything printed before that is discarded.

use core::fmt;

use spin::Once;

/// Operations the display sink provides. Both must be callable from
/// interrupt context: synchronous, non-blocking, no allocation.
#[derive(Clone, Copy)]
pub struct ConsoleOps {
    /// Render one character at the cursor and advance it.
    pub put_char: fn(u8),
    /// Retreat the cursor by one cell (backspace handling).
    pub backspace: fn(),
}

static CONSOLE: Once<ConsoleOps> = Once::new();

/// Register the display sink. Only the first registration takes effect.
pub fn register(ops: ConsoleOps) {
    CONSOLE.call_once(|| ops);
}

pub fn put_char(byte: u8) {
    if let Some(ops) = CONSOLE.get() {
        (ops.put_char)(byte);
    }
}

pub fn backspace() {
    if let Some(ops) = CONSOLE.get() {
        (ops.backspace)();
    }
}

/// `core::fmt::Write` adapter over the registered sink, for the diagnostic
/// report and the `kprint!`/`kprintln!` macros.
pub struct Writer;

impl fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            put_char(byte);
        }
        Ok(())
    }
}

#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = write!($crate::console::Writer, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprint!("\n") };
    ($($arg:tt)*) => {{
        use core::fmt::Write;
        let _ = writeln!($crate::console::Writer, $($arg)*);
    }};
}
