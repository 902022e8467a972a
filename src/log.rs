//! Buffered logging wrapper routed through the `log` facade.
//!
//! Supports the same three buffering disciplines the teacher plugin used
//! around `libc::syslog`, but the sink is now whatever subscriber the
//! embedding application installs (`env_logger`, `tracing-log`, …) rather
//! than a hard-coded syslog call. This is also the built-in default for the
//! LOG callback id (§4.4): when no conn-local or app-global LOG callback is
//! registered, the resolver falls back to a `Log::new(LogMode::Immediate)`.

use std::fmt;
use std::sync::Mutex;

use log::Level;

/// Logging mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// Emit every message immediately via the `log` facade.
    Immediate,
    /// Buffer lines, emit only the last one if `flush()` is called.
    OnFailure,
    /// Buffer the full trace, emit everything if `flush()` is called.
    FullTraceOnFailure,
    /// Discard all output.
    None,
}

struct Entry {
    level: Level,
    message: String,
}

/// Logger instance. One per connection, or one shared instance used as the
/// built-in LOG callback default.
pub struct Log {
    mode: LogMode,
    lines: Mutex<Vec<Entry>>,
    flush_on_drop: Mutex<bool>,
}

impl Log {
    pub fn new(mode: LogMode) -> Self {
        Self {
            mode,
            lines: Mutex::new(Vec::new()),
            flush_on_drop: Mutex::new(false),
        }
    }

    /// Write a log message at the given level.
    pub fn write(&self, level: Level, msg: impl fmt::Display) {
        let message = format!("sasl_core: {}", msg);
        match self.mode {
            LogMode::Immediate => {
                log::log!(level, "{}", message);
            }
            LogMode::OnFailure | LogMode::FullTraceOnFailure => {
                if let Ok(mut lines) = self.lines.lock() {
                    lines.push(Entry { level, message });
                }
            }
            LogMode::None => {}
        }
    }

    /// Convenience matching the framework's built-in LOG callback default (§4.4).
    pub fn info(&self, msg: impl fmt::Display) {
        self.write(Level::Info, msg);
    }

    pub fn warn(&self, msg: impl fmt::Display) {
        self.write(Level::Warn, msg);
    }

    pub fn error(&self, msg: impl fmt::Display) {
        self.write(Level::Error, msg);
    }

    /// Mark that logs should be flushed when this logger is dropped (e.g.
    /// on authentication failure).
    pub fn set_flush_on_drop(&self) {
        if let Ok(mut f) = self.flush_on_drop.lock() {
            *f = true;
        }
    }

    /// Flush buffered logs through the `log` facade.
    pub fn flush(&self) {
        if let Ok(lines) = self.lines.lock() {
            match self.mode {
                LogMode::FullTraceOnFailure => {
                    for entry in lines.iter() {
                        log::log!(entry.level, "{}", entry.message);
                    }
                }
                LogMode::OnFailure => {
                    if let Some(last) = lines.last() {
                        log::log!(last.level, "{}", last.message);
                    }
                }
                _ => {}
            }
        }
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        if let Ok(f) = self.flush_on_drop.lock() {
            if *f {
                self.flush();
            }
        }
    }
}
