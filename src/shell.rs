use crate::engine::{EngineError, Evaluator};
use crate::io_adapters::Console;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::fmt::Display;
use tracing::{debug, info, warn};

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
pub type ExitCode = i32;

/// Prompt shown when a new input starts.
pub const PROMPT: &str = "autotest> ";

/// Prompt shown while an input is still incomplete.
pub const CONTINUATION_PROMPT: &str = "        > ";

/// Exit code when the user interrupts the shell at an empty prompt.
pub const INTERRUPTED_EXIT_CODE: ExitCode = 130;

/// One event from a line source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Text(String),
    /// Ctrl-C.
    Interrupted,
    /// Ctrl-D or end of the input stream.
    Eof,
}

/// Source of interactive input.
pub trait LineReader {
    fn read_line(&mut self, prompt: &str) -> anyhow::Result<Line>;

    /// Record an accepted line in the session history.
    fn add_history(&mut self, _line: &str) {}
}

/// Terminal line editor with in-memory history.
pub struct RustylineReader {
    editor: DefaultEditor,
}

impl RustylineReader {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl LineReader for RustylineReader {
    fn read_line(&mut self, prompt: &str) -> anyhow::Result<Line> {
        match self.editor.readline(prompt) {
            Ok(line) => Ok(Line::Text(line)),
            Err(ReadlineError::Interrupted) => Ok(Line::Interrupted),
            Err(ReadlineError::Eof) => Ok(Line::Eof),
            Err(err) => Err(err.into()),
        }
    }

    fn add_history(&mut self, line: &str) {
        if let Err(err) = self.editor.add_history_entry(line) {
            debug!(error = %err, "failed to record history entry");
        }
    }
}

/// Lifecycle of a [`Shell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Engine configured, nothing evaluated yet.
    Configured,
    /// Bootstrap input evaluated, successfully or not.
    Primed,
    /// Reading user input.
    Interactive,
    Terminated,
}

/// Read-eval-print loop over one evaluator.
///
/// Evaluation errors are reported and never end the loop; only end of input,
/// an exit command or an interrupt at an empty prompt do.
pub struct Shell<E> {
    evaluator: E,
    reader: Box<dyn LineReader>,
    console: Console,
    phase: Phase,
}

impl<E: Evaluator> Shell<E> {
    pub fn new(evaluator: E, reader: Box<dyn LineReader>, console: Console) -> Self {
        Self {
            evaluator,
            reader,
            console,
            phase: Phase::Configured,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    /// Prime with `initial_input`, if any, then run the interactive loop.
    pub fn run(&mut self, initial_input: Option<&str>) -> ExitCode {
        let requested = initial_input.and_then(|input| self.prime(input));
        let code = match requested {
            Some(code) => {
                info!(code, "bootstrap input requested exit");
                code
            }
            None => {
                self.phase = Phase::Interactive;
                info!("entering interactive loop");
                self.interact()
            }
        };

        self.phase = Phase::Terminated;
        info!(code, "interactive loop finished");
        code
    }

    /// Evaluate the bootstrap input once. Failures are reported, not fatal.
    ///
    /// Returns the exit code if the bootstrap input asked to quit.
    fn prime(&mut self, input: &str) -> Option<ExitCode> {
        debug!(input, "priming engine");
        if let Err(err) = self.evaluator.evaluate(input) {
            warn!(error = %err, "bootstrap input failed");
            self.report_error(&err);
        }
        self.phase = Phase::Primed;
        self.evaluator.take_exit_request()
    }

    fn interact(&mut self) -> ExitCode {
        let mut pending = String::new();

        loop {
            let prompt = if pending.is_empty() {
                PROMPT
            } else {
                CONTINUATION_PROMPT
            };

            let line = match self.reader.read_line(prompt) {
                Ok(line) => line,
                Err(err) => {
                    self.report_error(&format!("Error: {err}"));
                    return 1;
                }
            };

            let text = match line {
                Line::Text(text) => text,
                Line::Eof => return 0,
                Line::Interrupted if pending.is_empty() => return INTERRUPTED_EXIT_CODE,
                Line::Interrupted => {
                    pending.clear();
                    continue;
                }
            };

            if pending.is_empty() {
                let command = text.trim();
                if command.is_empty() {
                    continue;
                }
                if is_exit_command(command) {
                    return 0;
                }
            }

            self.reader.add_history(&text);
            pending.push_str(&text);
            pending.push('\n');

            match self.evaluator.evaluate(&pending) {
                Ok(evaluation) => {
                    pending.clear();
                    if let Some(value) = evaluation.value {
                        self.report_value(&value);
                    }
                }
                Err(EngineError::Incomplete) => continue,
                Err(err) => {
                    pending.clear();
                    self.report_error(&err);
                }
            }

            if let Some(code) = self.evaluator.take_exit_request() {
                return code;
            }
        }
    }

    fn report_value(&self, value: &str) {
        if let Err(err) = self.console.write_out(&format!("{value}\n")) {
            warn!(error = %err, "failed to write result");
        }
    }

    fn report_error(&self, error: &dyn Display) {
        if let Err(err) = self.console.write_err(&format!("{error}\n")) {
            warn!(error = %err, "failed to write diagnostic");
        }
    }
}

fn is_exit_command(command: &str) -> bool {
    matches!(command, "quit" | "exit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{Engine, EngineConfig, Evaluation};
    use crate::io_adapters::ScriptedLines;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Evaluator failing on its first call, echoing input afterwards.
    #[derive(Default)]
    struct FailsFirst {
        seen: Vec<String>,
    }

    impl Evaluator for FailsFirst {
        fn evaluate(&mut self, input: &str) -> Result<Evaluation, EngineError> {
            self.seen.push(input.to_string());
            if self.seen.len() == 1 {
                return Err(EngineError::Lua(mlua::Error::RuntimeError(
                    "bootstrap exploded".to_string(),
                )));
            }
            Ok(Evaluation {
                value: Some(format!("echo {}", input.trim_end())),
            })
        }
    }

    fn captured(handle: &Rc<RefCell<Vec<u8>>>) -> String {
        String::from_utf8(handle.borrow().clone()).unwrap()
    }

    type Captured = Rc<RefCell<Vec<u8>>>;

    fn lua_shell(lines: ScriptedLines) -> (Shell<Engine>, Captured, Captured) {
        let (console, out, err) = Console::memory();
        let engine = Engine::new(EngineConfig::default(), None, console.clone()).unwrap();
        (Shell::new(engine, Box::new(lines), console), out, err)
    }

    #[test]
    fn test_priming_failure_still_enters_loop() {
        let (console, out, err) = Console::memory();
        let reader = ScriptedLines::new(["next"]);
        let mut shell = Shell::new(FailsFirst::default(), Box::new(reader), console);

        let code = shell.run(Some("bootstrap"));

        assert_eq!(code, 0);
        assert_eq!(shell.phase(), Phase::Terminated);
        assert_eq!(shell.evaluator().seen, vec!["bootstrap", "next\n"]);
        assert!(captured(&err).contains("bootstrap exploded"));
        assert_eq!(captured(&out), "echo next\n");
    }

    #[test]
    fn test_run_without_initial_input_skips_priming() {
        let (console, _, _) = Console::memory();
        let reader = ScriptedLines::new(Vec::<String>::new());
        let mut shell = Shell::new(FailsFirst::default(), Box::new(reader), console);
        assert_eq!(shell.phase(), Phase::Configured);
        assert_eq!(shell.run(None), 0);
        assert!(shell.evaluator().seen.is_empty());
    }

    #[test]
    fn test_values_and_errors_are_reported_and_loop_continues() {
        let (mut shell, out, err) = lua_shell(ScriptedLines::new([
            "x = 20",
            "error('bad input')",
            "x * 2 + 2",
        ]));

        assert_eq!(shell.run(None), 0);
        assert_eq!(captured(&out), "42\n");
        assert!(captured(&err).contains("bad input"));
    }

    #[test]
    fn test_primed_state_is_visible_to_later_input() {
        let (mut shell, out, err) = lua_shell(ScriptedLines::new(["greeting .. ', world'"]));

        assert_eq!(shell.run(Some("greeting = 'hello'")), 0);
        assert_eq!(captured(&out), "\"hello, world\"\n");
        assert!(captured(&err).is_empty());
    }

    #[test]
    fn test_quit_during_priming_ends_before_reading_input() {
        let lines = ScriptedLines::new(["1", "2"]);
        let prompts = lines.prompts();
        let (mut shell, out, _) = lua_shell(lines);

        assert_eq!(shell.run(Some("quit(5)")), 5);
        assert_eq!(shell.phase(), Phase::Terminated);
        assert!(captured(&out).is_empty());
        assert!(prompts.borrow().is_empty());
    }

    #[test]
    fn test_multi_line_input_uses_continuation_prompt() {
        let lines = ScriptedLines::new(["function add(a, b)", "  return a + b", "end", "add(2, 3)"]);
        let prompts = lines.prompts();
        let (mut shell, out, _) = lua_shell(lines);

        assert_eq!(shell.run(None), 0);
        assert_eq!(captured(&out), "5\n");
        assert_eq!(
            *prompts.borrow(),
            vec![PROMPT, CONTINUATION_PROMPT, CONTINUATION_PROMPT, PROMPT, PROMPT]
        );
    }

    #[test]
    fn test_exit_commands_end_loop() {
        for command in ["quit", "exit", "  exit  "] {
            let (mut shell, out, _) = lua_shell(ScriptedLines::new([command, "1"]));
            assert_eq!(shell.run(None), 0, "command: {command}");
            assert!(captured(&out).is_empty(), "command: {command}");
        }
    }

    #[test]
    fn test_quit_helper_sets_exit_code() {
        let (mut shell, out, _) = lua_shell(ScriptedLines::new(["quit(7)", "1"]));
        assert_eq!(shell.run(None), 7);
        assert!(captured(&out).is_empty());
    }

    #[test]
    fn test_interrupt_discards_pending_input() {
        let lines = ScriptedLines::from_events([
            Line::Text("function broken(".to_string()),
            Line::Interrupted,
            Line::Text("1 + 1".to_string()),
            Line::Interrupted,
            Line::Text("2 + 2".to_string()),
        ]);
        let (mut shell, out, _) = lua_shell(lines);

        assert_eq!(shell.run(None), INTERRUPTED_EXIT_CODE);
        assert_eq!(captured(&out), "2\n");
    }

    #[test]
    fn test_blank_lines_are_ignored() {
        let (mut shell, out, err) = lua_shell(ScriptedLines::new(["", "   ", "'ok'"]));
        assert_eq!(shell.run(None), 0);
        assert_eq!(captured(&out), "\"ok\"\n");
        assert!(captured(&err).is_empty());
    }

    struct BrokenReader;

    impl LineReader for BrokenReader {
        fn read_line(&mut self, _prompt: &str) -> anyhow::Result<Line> {
            Err(anyhow::anyhow!("terminal went away"))
        }
    }

    #[test]
    fn test_reader_failure_ends_loop_with_error_code() {
        let (console, _, err) = Console::memory();
        let mut shell = Shell::new(FailsFirst::default(), Box::new(BrokenReader), console);
        assert_eq!(shell.run(None), 1);
        assert!(captured(&err).contains("terminal went away"));
    }
}
