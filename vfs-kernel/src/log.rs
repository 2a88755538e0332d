//! Pluggable logging (ambient stack)
//!
//! A tiny `write_str` sink plus `fmt::Write`-backed macros, in the style
//! of an early boot-time printk — except the sink itself is an
//! interface rather than a hardwired serial port, so the same log calls
//! work over a real UART in the kernel and over a `Vec<String>` in
//! tests.

use core::fmt::{self, Write};
use spin::Mutex;

/// Destination for formatted log output. A kernel installs one concrete
/// sink (serial port, in-memory ring buffer, ...) via [`set_sink`].
pub trait LogSink: Send + Sync {
    fn write_str(&self, s: &str);
}

static SINK: Mutex<Option<&'static dyn LogSink>> = Mutex::new(None);

/// Installs the process-wide log sink. Later calls replace the prior one.
pub fn set_sink(sink: &'static dyn LogSink) {
    *SINK.lock() = Some(sink);
}

/// Clears the installed sink; subsequent log calls are silently dropped.
pub fn clear_sink() {
    *SINK.lock() = None;
}

struct SinkWriter;

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = *SINK.lock() {
            sink.write_str(s);
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    let _ = SinkWriter.write_fmt(args);
}

/// Formatted log write with no trailing newline.
#[macro_export]
macro_rules! printk {
    ($($arg:tt)*) => {
        $crate::log::_print(core::format_args!($($arg)*))
    };
}

/// Formatted log write with a trailing newline.
#[macro_export]
macro_rules! printkln {
    () => ($crate::printk!("\n"));
    ($($arg:tt)*) => {{
        $crate::log::_print(core::format_args!($($arg)*));
        $crate::log::_print(core::format_args!("\n"));
    }};
}
