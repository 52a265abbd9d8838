//! Console output and the `log` sink
//!
//! Text goes to an installable sink function (the demo binary points it at
//! stdout). Without a sink the most recent output is kept in a small
//! buffer, which is what tests read back.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Capacity of the fallback buffer
const BUFFER_SIZE: usize = 1024;

/// Console writer
pub struct Console {
    sink: Option<fn(&str)>,
    buffer: heapless::String<BUFFER_SIZE>,
}

impl Console {
    /// Create a new console instance
    pub const fn new() -> Self {
        Console {
            sink: None,
            buffer: heapless::String::new(),
        }
    }

    /// Write a string to the console
    pub fn write_str(&mut self, s: &str) {
        if let Some(sink) = self.sink {
            sink(s);
            return;
        }
        for ch in s.chars() {
            if self.buffer.push(ch).is_err() {
                // Keep the newest output.
                self.buffer.clear();
                let _ = self.buffer.push(ch);
            }
        }
    }

    pub fn set_sink(&mut self, sink: fn(&str)) {
        self.sink = Some(sink);
    }

    /// Buffered output (empty once a sink is installed)
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Clear the console
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Write one log record as `[LEVEL] target: message`
    pub fn write_record(&mut self, record: &Record) -> fmt::Result {
        writeln!(self, "[{:>5}] {}: {}", record.level(), record.target(), record.args())
    }
}

impl fmt::Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Console::write_str(self, s);
        Ok(())
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// Route console output to `sink`
pub fn set_sink(sink: fn(&str)) {
    CONSOLE.lock().set_sink(sink);
}

/// Take and clear the buffered output
pub fn take_buffer() -> heapless::String<BUFFER_SIZE> {
    let mut console = CONSOLE.lock();
    let out = console.buffer.clone();
    console.clear();
    out
}

/// Print formatted text to console
pub fn print(args: fmt::Arguments) {
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Print macro
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::console::print(format_args!($($arg)*));
    };
}

/// Print with newline macro
#[macro_export]
macro_rules! println {
    () => {
        $crate::print!("\n");
    };
    ($($arg:tt)*) => {
        $crate::console::print(format_args!("{}\n", format_args!($($arg)*)))
    };
}

// ============================================================================
// Logger
// ============================================================================

/// `log` backend writing through the console
pub struct ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _ = CONSOLE.lock().write_record(record);
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Install the console logger (once) and set the level
pub fn init_logger(level: LevelFilter) {
    // A second call only adjusts the level.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_write() {
        let mut console = Console::new();
        console.write_str("Hello, exofork!");
        assert!(console.buffer().contains("Hello, exofork!"));
    }

    #[test]
    fn test_console_formatting() {
        let mut console = Console::new();
        write!(&mut console, "Env {:08x}", 0x1001).unwrap();
        assert!(console.buffer().contains("Env 00001001"));
    }

    #[test]
    fn test_console_keeps_newest_output() {
        let mut console = Console::new();
        for _ in 0..BUFFER_SIZE {
            console.write_str("x");
        }
        console.write_str("tail");
        assert!(console.buffer().ends_with("tail"));
        assert!(console.buffer().len() <= BUFFER_SIZE);
    }

    #[test]
    fn test_record_format() {
        let mut console = Console::new();
        console
            .write_record(
                &Record::builder()
                    .args(format_args!("forked {}", 0x1001))
                    .level(log::Level::Info)
                    .target("exofork::cow")
                    .build(),
            )
            .unwrap();
        assert_eq!(console.buffer(), "[ INFO] exofork::cow: forked 4097\n");
    }

    #[test]
    fn test_logger_writes_to_console_buffer() {
        // No logger is installed in the test binary; only the level gate
        // is global.
        log::set_max_level(LevelFilter::Debug);
        ConsoleLogger.log(
            &Record::builder()
                .args(format_args!("exception stack at {:#x}", 0xeebf_f000u32))
                .level(log::Level::Debug)
                .target("exofork::runtime")
                .build(),
        );
        ConsoleLogger.log(
            &Record::builder()
                .args(format_args!("hidden"))
                .level(log::Level::Trace)
                .target("exofork::cow")
                .build(),
        );

        let out = take_buffer();
        assert!(out.contains("[DEBUG] exofork::runtime: exception stack at 0xeebff000\n"));
        assert!(!out.contains("hidden"));
        assert!(take_buffer().is_empty());
    }
}
