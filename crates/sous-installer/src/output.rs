use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Unable to encode output: {0}")]
    Encoding(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The output capability the executor requires: append one line.
///
/// The executor serializes its own writes, so implementations see one call at a time per
/// multi-line block; they only need to make a single line atomic.
pub trait OutputSink: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), OutputError>;
}

/// Line-buffered standard output.
#[derive(Debug, Default)]
pub struct StdoutSink;

impl OutputSink for StdoutSink {
    fn write_line(&self, line: &str) -> Result<(), OutputError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(line.as_bytes())?;
        handle.write_all(b"\n")?;
        Ok(())
    }
}

/// Captures output in memory; the test suite's stand-in for a styled console.
///
/// With [`BufferedSink::ascii_only`], lines containing non-ASCII characters are rejected
/// the way a misconfigured console encoding would reject them.
#[derive(Debug, Clone, Default)]
pub struct BufferedSink {
    lines: Arc<Mutex<Vec<String>>>,
    ascii_only: bool,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any line that cannot be represented in ASCII.
    #[must_use]
    pub fn ascii_only(self) -> Self {
        Self {
            ascii_only: true,
            ..self
        }
    }

    /// Everything written so far, one `\n` per line (including a trailing one).
    pub fn contents(&self) -> String {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let mut contents = lines.join("\n");
        if !lines.is_empty() {
            contents.push('\n');
        }
        contents
    }
}

impl OutputSink for BufferedSink {
    fn write_line(&self, line: &str) -> Result<(), OutputError> {
        if self.ascii_only && !line.is_ascii() {
            return Err(OutputError::Encoding(format!(
                "`{}` contains characters unrepresentable in the output encoding",
                line.escape_default(),
            )));
        }
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_string());
        Ok(())
    }
}
