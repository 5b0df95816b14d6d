use crate::shell::{Line, LineReader};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Result as IoResult, Write};
use std::rc::Rc;

type SharedSink = Rc<RefCell<Box<dyn Write>>>;

/// Output and diagnostic sinks shared by the engine and the shell.
///
/// Cloning is cheap; clones write to the same sinks.
#[derive(Clone)]
pub struct Console {
    out: SharedSink,
    err: SharedSink,
}

impl Console {
    pub fn new(out: impl Write + 'static, err: impl Write + 'static) -> Self {
        Self {
            out: Rc::new(RefCell::new(Box::new(out))),
            err: Rc::new(RefCell::new(Box::new(err))),
        }
    }

    /// Console bound to the process stdout and stderr.
    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr())
    }

    /// Console writing into memory; returns handles to the captured output
    /// and diagnostics.
    pub fn memory() -> (Self, Rc<RefCell<Vec<u8>>>, Rc<RefCell<Vec<u8>>>) {
        let (out, out_handle) = MemWriter::capture();
        let (err, err_handle) = MemWriter::capture();
        (Self::new(out, err), out_handle, err_handle)
    }

    pub fn write_out(&self, text: &str) -> IoResult<()> {
        write_flushed(&self.out, text)
    }

    pub fn write_err(&self, text: &str) -> IoResult<()> {
        write_flushed(&self.err, text)
    }
}

fn write_flushed(sink: &SharedSink, text: &str) -> IoResult<()> {
    let mut sink = sink.borrow_mut();
    sink.write_all(text.as_bytes())?;
    sink.flush()
}

/// Console sink that keeps everything the engine and shell print.
///
/// The bytes stay reachable through the handle returned by
/// [`MemWriter::capture`] after the sink itself has been moved into a
/// [`Console`].
pub struct MemWriter {
    captured: Rc<RefCell<Vec<u8>>>,
}

impl MemWriter {
    pub fn capture() -> (Self, Rc<RefCell<Vec<u8>>>) {
        let captured = Rc::new(RefCell::new(Vec::new()));
        let sink = Self {
            captured: Rc::clone(&captured),
        };
        (sink, captured)
    }
}

impl Write for MemWriter {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.write_all(data)?;
        Ok(data.len())
    }

    fn write_all(&mut self, data: &[u8]) -> IoResult<()> {
        self.captured.borrow_mut().extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> IoResult<()> {
        Ok(())
    }
}

/// Line source replaying a fixed script, then reporting end of input.
///
/// Every prompt it is asked with is recorded.
pub struct ScriptedLines {
    lines: VecDeque<Line>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedLines {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_events(lines.into_iter().map(|line| Line::Text(line.into())))
    }

    /// Script arbitrary reader events, including interrupts.
    pub fn from_events(events: impl IntoIterator<Item = Line>) -> Self {
        Self {
            lines: events.into_iter().collect(),
            prompts: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Handle to the prompts shown so far.
    pub fn prompts(&self) -> Rc<RefCell<Vec<String>>> {
        self.prompts.clone()
    }
}

impl LineReader for ScriptedLines {
    fn read_line(&mut self, prompt: &str) -> anyhow::Result<Line> {
        self.prompts.borrow_mut().push(prompt.to_string());
        Ok(self.lines.pop_front().unwrap_or(Line::Eof))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_memory_captures_both_sinks() {
        let (console, out, err) = Console::memory();
        console.write_out("result\n").unwrap();
        console.clone().write_err("oops\n").unwrap();

        assert_eq!(String::from_utf8(out.borrow().clone()).unwrap(), "result\n");
        assert_eq!(String::from_utf8(err.borrow().clone()).unwrap(), "oops\n");
    }

    #[test]
    fn test_captured_bytes_outlive_sink() {
        let (mut sink, captured) = MemWriter::capture();
        write!(sink, "a{}", 1).unwrap();
        drop(sink);
        assert_eq!(captured.borrow().as_slice(), b"a1");
    }

    #[test]
    fn test_scripted_lines_end_with_eof() {
        let mut lines = ScriptedLines::new(["one"]);
        let prompts = lines.prompts();

        assert!(matches!(lines.read_line("> ").unwrap(), Line::Text(text) if text == "one"));
        assert!(matches!(lines.read_line(">> ").unwrap(), Line::Eof));
        assert_eq!(*prompts.borrow(), vec!["> ", ">> "]);
    }
}
