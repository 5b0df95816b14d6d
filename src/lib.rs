//! Interactive Lua shell for driving an application under test.
//!
//! The shell parses its command line into a [`LaunchConfig`], builds a short
//! bootstrap script that creates an `AutoTestClientSession` and either
//! launches or attaches to the target, primes a Lua [`Engine`] with it and
//! hands control to a read-eval-print loop.
//!
//! Modules that sit next to the target application can be loaded with
//! `require`: a [`LibraryResolver`] rooted at the target's directory is
//! registered before any input is evaluated.
//!
//! The pieces are usable on their own. For example, driving a [`Shell`] with
//! scripted input:
//!
//! ```
//! use autotest_repl::{Console, Engine, EngineConfig, ScriptedLines, Shell};
//!
//! let (console, out, _err) = Console::memory();
//! let engine = Engine::new(EngineConfig::default(), None, console.clone()).unwrap();
//! let mut shell = Shell::new(engine, Box::new(ScriptedLines::new(["1 + 1"])), console);
//!
//! assert_eq!(shell.run(None), 0);
//! assert_eq!(out.borrow().as_slice(), b"2\n");
//! ```

pub mod app;
pub mod automation;
pub mod bootstrap;
pub mod engine;
mod io_adapters;
mod launcher;
pub mod options;
pub mod resolver;
pub mod shell;

pub use engine::{Engine, EngineConfig, EngineError, Evaluation, Evaluator, TopLevelBase};
pub use io_adapters::{Console, MemWriter, ScriptedLines};
pub use options::{LaunchConfig, OptionsError};
pub use resolver::LibraryResolver;
pub use shell::{ExitCode, Line, LineReader, Phase, RustylineReader, Shell};
