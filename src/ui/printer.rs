use crossterm::style::{Color, Stylize};
use std::fmt::Display;
use std::io::{self, IsTerminal, Write};
use std::sync::{Arc, Mutex};

use crate::config::Styling;

/// Line-oriented output sink with optional 256-color styling.
///
/// Normal output goes to `out`, diagnostics to `err`. Styling only ever
/// affects `out`.
pub struct Printer {
    out: Box<dyn Write + Send>,
    err: Box<dyn Write + Send>,
    styling: bool,
}

impl Printer {
    pub fn new(
        out: impl Write + Send + 'static,
        err: impl Write + Send + 'static,
        styling: bool,
    ) -> Self {
        Self {
            out: Box::new(out),
            err: Box::new(err),
            styling,
        }
    }

    /// Printer over stdout/stderr, resolving `auto` against the terminal.
    pub fn stdio(mode: Styling) -> Self {
        Self::new(io::stdout(), io::stderr(), styling_enabled(mode))
    }

    pub fn styling(&self) -> bool {
        self.styling
    }

    pub fn set_styling(&mut self, styling: bool) {
        self.styling = styling;
    }

    /// `text` in palette color `color`, or unchanged when styling is off.
    pub fn paint(&self, text: &str, color: u8) -> String {
        if self.styling {
            text.with(Color::AnsiValue(color)).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn print(&mut self, text: impl Display) -> io::Result<()> {
        write!(self.out, "{}", text)
    }

    pub fn println(&mut self, line: impl Display) -> io::Result<()> {
        writeln!(self.out, "{}", line)
    }

    pub fn eprintln(&mut self, line: impl Display) -> io::Result<()> {
        writeln!(self.err, "{}", line)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()?;
        self.err.flush()
    }
}

/// Whether `mode` means colors for the current process.
pub fn styling_enabled(mode: Styling) -> bool {
    match mode {
        Styling::Always => true,
        Styling::Never => false,
        Styling::Auto => {
            io::stdout().is_terminal() && std::env::var_os("NO_COLOR").map_or(true, |v| v.is_empty())
        }
    }
}

/// Cloneable in-memory writer for capturing printer output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn contents(&self) -> String {
        self.0
            .lock()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self
            .0
            .lock()
            .map_err(|_| io::Error::other("output buffer poisoned"))?;
        bytes.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
