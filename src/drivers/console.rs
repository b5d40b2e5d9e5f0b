//! Console output helpers
//!
//! The console itself is a [`Console`] collaborator. This module adds the
//! kernel's formatted output on top of it.
//!
//! Formatted output is assembled in a line buffer and handed to the console
//! in one `write_bytes` call, so lines printed by different processes never
//! interleave.

use alloc::string::String;
use core::fmt::{self, Write};

use crate::platform::Console;

/// Buffered formatter over a console. Flushes on drop.
pub struct ConsoleWriter<'a> {
    console: &'a dyn Console,
    line: String,
}

impl<'a> ConsoleWriter<'a> {
    pub fn new(console: &'a dyn Console) -> Self {
        Self {
            console,
            line: String::new(),
        }
    }

    /// Hand everything written so far to the console.
    pub fn flush(&mut self) {
        if !self.line.is_empty() {
            self.console.write_bytes(self.line.as_bytes());
            self.line.clear();
        }
    }
}

impl Write for ConsoleWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.line.push_str(s);
        Ok(())
    }
}

impl Drop for ConsoleWriter<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Write `bytes` in pieces of at most `chunk` bytes.
pub fn write_chunked(console: &dyn Console, bytes: &[u8], chunk: usize) {
    for piece in bytes.chunks(chunk.max(1)) {
        console.write_bytes(piece);
    }
}

/// Print macro for kernel output
#[macro_export]
macro_rules! kprint {
    ($console:expr, $($arg:tt)*) => {{
        use core::fmt::Write;
        let mut writer = $crate::drivers::console::ConsoleWriter::new($console);
        let _ = write!(writer, $($arg)*);
    }};
}

/// Println macro for kernel output
#[macro_export]
macro_rules! kprintln {
    ($console:expr) => {
        $crate::kprint!($console, "\n")
    };
    ($console:expr, $($arg:tt)*) => {{
        use core::fmt::Write;
        let mut writer = $crate::drivers::console::ConsoleWriter::new($console);
        let _ = writeln!(writer, $($arg)*);
    }};
}
