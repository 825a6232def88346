//! Verbose output sink for storage engine checkpoints.
//!
//! When disabled, `log` calls are no-ops. When enabled, every line is
//! prefixed with `verbose: ` so it can be grepped out of stderr. Warnings
//! (suppressed failures) are always written with a `warning: ` prefix.
//! Write failures are ignored: logging never fails an operation.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

const VERBOSE_PREFIX: &str = "verbose: ";
const WARNING_PREFIX: &str = "warning: ";

pub struct VerboseLogger {
    sink: Mutex<Box<dyn Write + Send>>,
    enabled: bool,
}

impl VerboseLogger {
    pub fn new(sink: impl Write + Send + 'static, enabled: bool) -> Self {
        Self {
            sink: Mutex::new(Box::new(sink)),
            enabled,
        }
    }

    /// Logger writing to stderr, as used by the CLI.
    pub fn stderr(enabled: bool) -> Self {
        Self::new(io::stderr(), enabled)
    }

    pub fn log(&self, msg: &str) {
        tracing::debug!(target: "tick::engine", "{}", msg);
        if self.enabled {
            self.write_line(VERBOSE_PREFIX, format_args!("{}", msg));
        }
    }

    /// Formatted variant of [`log`](Self::log); use with `format_args!`.
    pub fn log_fmt(&self, args: fmt::Arguments<'_>) {
        tracing::debug!(target: "tick::engine", "{}", args);
        if self.enabled {
            self.write_line(VERBOSE_PREFIX, args);
        }
    }

    pub fn warn(&self, msg: &str) {
        tracing::warn!(target: "tick::engine", "{}", msg);
        self.write_line(WARNING_PREFIX, format_args!("{}", msg));
    }

    fn write_line(&self, prefix: &str, args: fmt::Arguments<'_>) {
        let mut sink = match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = writeln!(sink, "{}{}", prefix, args);
        let _ = sink.flush();
    }
}

impl Default for VerboseLogger {
    fn default() -> Self {
        Self::stderr(false)
    }
}

impl fmt::Debug for VerboseLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerboseLogger")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// In-memory sink whose contents can be read back, for capturing output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        let buf = match self.0.lock() {
            Ok(buf) => buf,
            Err(poisoned) => poisoned.into_inner(),
        };
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn clear(&self) {
        if let Ok(mut buf) = self.0.lock() {
            buf.clear();
        }
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "buffer lock poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_logger_writes_nothing() {
        let buf = SharedBuffer::new();
        let logger = VerboseLogger::new(buf.clone(), false);
        logger.log("lock acquired (shared)");
        logger.log_fmt(format_args!("cache rebuild: {} tasks", 3));
        assert_eq!(buf.contents(), "");
    }

    #[test]
    fn enabled_logger_prefixes_every_line() {
        let buf = SharedBuffer::new();
        let logger = VerboseLogger::new(buf.clone(), true);
        logger.log("lock acquired (exclusive)");
        logger.log_fmt(format_args!("cache rebuild: {} tasks", 2));
        assert_eq!(
            buf.contents(),
            "verbose: lock acquired (exclusive)\nverbose: cache rebuild: 2 tasks\n"
        );
    }

    #[test]
    fn warnings_are_written_even_when_disabled() {
        let buf = SharedBuffer::new();
        let logger = VerboseLogger::new(buf.clone(), false);
        logger.warn("cache update failed");
        assert_eq!(buf.contents(), "warning: cache update failed\n");
    }

    #[test]
    fn failing_sink_is_ignored() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::Other, "closed"))
            }
        }

        let logger = VerboseLogger::new(Broken, true);
        logger.log("still fine");
        logger.warn("still fine");
    }
}
